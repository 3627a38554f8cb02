//! 事件总线
//!
//! 把任务生命周期事件与指标批次扇出给两类接收者：全局事件处理器
//! （按注册顺序）与单任务观察者。发布方只负责把事件放进每个接收者
//! 的邮箱，投递由接收者各自的协程驱动，慢接收者不会阻塞发布方。
//! 邮箱内生命周期事件永不丢弃；同一任务排在队尾的指标批次会被更新
//! 的批次原位替换，慢观察者看到的始终是最新批次。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, RwLock};
use tracing::debug;

use snap_domain::{EventHandler, SchedulerEvent, TaskWatchHandler};

/// 单接收者邮箱
struct Mailbox {
    queue: Mutex<VecDeque<SchedulerEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// 入队一个事件；邮箱已关闭时返回 false
    fn push(&self, event: SchedulerEvent) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        {
            let mut queue = self.queue.lock().unwrap();
            // 队尾若是同一任务的指标批次，直接用新批次替换，
            // 保持任务时间线顺序的同时只保留最新数据
            if event.is_coalescible() {
                if let Some(back) = queue.back_mut() {
                    if back.is_coalescible() && back.task_id() == event.task_id() {
                        *back = event;
                        self.notify.notify_one();
                        return true;
                    }
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        true
    }

    fn pop(&self) -> Option<SchedulerEvent> {
        self.queue.lock().unwrap().pop_front()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 关闭邮箱并丢弃尚未投递的事件
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.lock().unwrap().clear();
        self.notify.notify_one();
    }

    async fn run<F, Fut>(self: Arc<Self>, mut deliver: F)
    where
        F: FnMut(SchedulerEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            while let Some(event) = self.pop() {
                deliver(event).await;
            }
            if self.is_closed() {
                break;
            }
            self.notify.notified().await;
        }
    }
}

struct HandlerEntry {
    name: String,
    mailbox: Arc<Mailbox>,
}

struct WatcherEntry {
    id: u64,
    mailbox: Arc<Mailbox>,
}

type WatcherTable = Arc<RwLock<HashMap<String, Vec<WatcherEntry>>>>;

pub struct EventBus {
    handlers: RwLock<Vec<HandlerEntry>>,
    watchers: WatcherTable,
    next_watcher_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            next_watcher_id: AtomicU64::new(1),
        }
    }

    /// 注册具名全局处理器，接收所有任务的全部事件变体
    pub async fn register_handler(&self, name: &str, handler: Arc<dyn EventHandler>) {
        let mailbox = Mailbox::new();
        {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(mailbox.run(move |event| {
                let handler = Arc::clone(&handler);
                async move {
                    handler.handle_event(&event).await;
                }
            }));
        }
        self.handlers.write().await.push(HandlerEntry {
            name: name.to_string(),
            mailbox,
        });
    }

    /// 注销全局处理器；存在同名处理器时移除最早注册的一个
    pub async fn unregister_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        if let Some(pos) = handlers.iter().position(|entry| entry.name == name) {
            let entry = handlers.remove(pos);
            entry.mailbox.close();
            true
        } else {
            false
        }
    }

    /// 为任务挂一个观察者，返回双方都可关闭的句柄
    pub async fn watch(
        &self,
        task_id: &str,
        handler: Arc<dyn TaskWatchHandler>,
    ) -> TaskWatchingHandle {
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);
        let mailbox = Mailbox::new();
        {
            let mailbox = Arc::clone(&mailbox);
            tokio::spawn(mailbox.run(move |event| {
                let handler = Arc::clone(&handler);
                async move {
                    match event {
                        SchedulerEvent::MetricsCollected { metrics, .. } => {
                            handler.catch_collection(metrics).await;
                        }
                        SchedulerEvent::TaskStarted { .. } => {
                            handler.catch_task_started().await;
                        }
                        SchedulerEvent::TaskStopped { .. } => {
                            handler.catch_task_stopped().await;
                        }
                        SchedulerEvent::TaskDisabled { why, .. } => {
                            handler.catch_task_disabled(why).await;
                        }
                        _ => {}
                    }
                }
            }));
        }

        self.watchers
            .write()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push(WatcherEntry { id, mailbox });

        TaskWatchingHandle {
            task_id: task_id.to_string(),
            watcher_id: id,
            watchers: Arc::clone(&self.watchers),
        }
    }

    /// 发布一个事件
    ///
    /// 调用方线程只做入队，入队按处理器注册顺序进行；
    /// 已关闭的观察者在本次投递时被摘除。
    pub async fn emit(&self, event: SchedulerEvent) {
        for entry in self.handlers.read().await.iter() {
            entry.mailbox.push(event.clone());
        }

        let mut stale = false;
        if let Some(list) = self.watchers.read().await.get(event.task_id()) {
            for watcher in list {
                if !watcher.mailbox.push(event.clone()) {
                    stale = true;
                }
            }
        }
        if stale {
            self.prune(event.task_id()).await;
        }
    }

    /// 关闭并移除某个任务的全部观察者（任务被移除时调用）
    pub async fn drop_task_watchers(&self, task_id: &str) {
        if let Some(list) = self.watchers.write().await.remove(task_id) {
            for watcher in &list {
                watcher.mailbox.close();
            }
            debug!("任务 {task_id} 的 {} 个观察者已关闭", list.len());
        }
    }

    async fn prune(&self, task_id: &str) {
        let mut watchers = self.watchers.write().await;
        if let Some(list) = watchers.get_mut(task_id) {
            list.retain(|w| !w.mailbox.is_closed());
            if list.is_empty() {
                watchers.remove(task_id);
            }
        }
    }
}

/// 观察者句柄；`close` 之后不再有事件投递
pub struct TaskWatchingHandle {
    task_id: String,
    watcher_id: u64,
    watchers: WatcherTable,
}

impl TaskWatchingHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn close(self) {
        let mut watchers = self.watchers.write().await;
        if let Some(list) = watchers.get_mut(&self.task_id) {
            if let Some(pos) = list.iter().position(|w| w.id == self.watcher_id) {
                let entry = list.remove(pos);
                entry.mailbox.close();
            }
            if list.is_empty() {
                watchers.remove(&self.task_id);
            }
        }
    }
}
