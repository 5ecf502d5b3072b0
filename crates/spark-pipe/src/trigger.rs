//! 一次性就绪触发器。
//!
//! ## 设计目标（Why）
//! - 生产者在收到 `Filled`/`Full` 后需要得知“何时可以继续写入”，但不能阻塞线程，
//!   因此由管道交出一个触发器，生产者在其上登记回调；
//! - 触发是一次性事件：触发后触发器即被消费，不会再次产生就绪通知。
//!
//! ## 契约说明（What）
//! - 单一登记槽：重复登记时新回调替换旧回调（并记录 `warn`）；
//! - 触发时若已有回调，则在触发调用栈上同步执行；
//! - 触发时若尚无回调，则锁存就绪：之后第一次登记立即执行，其后的登记永不执行；
//! - 克隆得到的是同一个触发器的共享句柄。
use std::{cell::RefCell, fmt, rc::Rc};

use tracing::warn;

type ReadyCallback = Box<dyn FnOnce()>;

enum Slot {
    Armed(Option<ReadyCallback>),
    /// 已触发；`latched` 表示就绪尚未被任何回调消费。
    Fired {
        latched: bool,
    },
}

/// 一次性就绪触发器。
///
/// # 契约说明（What）
/// - [`on_ready`](Self::on_ready)：登记就绪回调；
/// - [`fire`](Self::fire)：触发，至多执行一次回调；重复触发无效果；
/// - 非线程安全（内部使用 `Rc<RefCell<_>>`），与所属管道共享同一串行执行上下文。
#[derive(Clone)]
pub struct Trigger {
    slot: Rc<RefCell<Slot>>,
}

impl Trigger {
    /// 创建尚未触发的触发器。
    pub fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(Slot::Armed(None))),
        }
    }

    /// 登记就绪回调。
    ///
    /// 若触发器已触发且就绪尚未被消费，回调立即在当前调用栈执行。
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        let run_now = {
            let mut slot = self.slot.borrow_mut();
            match &mut *slot {
                Slot::Armed(existing) => {
                    if existing.is_some() {
                        warn!("trigger already had a pending callback; replacing it");
                    }
                    *existing = Some(Box::new(callback));
                    None
                }
                Slot::Fired { latched } if *latched => {
                    *latched = false;
                    Some(callback)
                }
                Slot::Fired { .. } => None,
            }
        };
        if let Some(callback) = run_now {
            callback();
        }
    }

    /// 触发。已触发的触发器再次触发不产生任何效果。
    pub fn fire(&self) {
        let callback = {
            let mut slot = self.slot.borrow_mut();
            match &mut *slot {
                Slot::Armed(callback) => {
                    let callback = callback.take();
                    *slot = Slot::Fired {
                        latched: callback.is_none(),
                    };
                    callback
                }
                Slot::Fired { .. } => None,
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    /// 是否已触发。
    pub fn is_fired(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Fired { .. })
    }

    /// 是否已有待执行的回调。
    pub fn has_callback(&self) -> bool {
        matches!(&*self.slot.borrow(), Slot::Armed(Some(_)))
    }

    /// 两个句柄是否指向同一个触发器。
    pub fn same_as(&self, other: &Trigger) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("fired", &self.is_fired())
            .finish()
    }
}
