//! Event listeners: per-task sets keyed by id, plus a global set.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::error;

use crate::domain::{TaskEvent, TaskId};

/// Callback invoked synchronously for each terminal event.
pub type Listener = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

/// Wrap a closure as a `Listener`.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&TaskEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    global: Vec<(ListenerId, Listener)>,
    per_task: HashMap<TaskId, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn add_global(&mut self, listener: Listener) -> ListenerId {
        let id = self.allocate_id();
        self.global.push((id, listener));
        id
    }

    pub fn remove_global(&mut self, id: ListenerId) -> bool {
        let before = self.global.len();
        self.global.retain(|(lid, _)| *lid != id);
        self.global.len() != before
    }

    pub fn add_task(&mut self, task_id: TaskId, listener: Listener) -> ListenerId {
        let id = self.allocate_id();
        self.per_task.entry(task_id).or_default().push((id, listener));
        id
    }

    /// Remove one per-task listener; the id's entry goes away with its last listener.
    pub fn remove_task(&mut self, task_id: &TaskId, id: ListenerId) -> bool {
        let Some(listeners) = self.per_task.get_mut(task_id) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.per_task.remove(task_id);
        }
        removed
    }

    #[cfg(test)]
    pub fn has_task_entry(&self, task_id: &TaskId) -> bool {
        self.per_task.contains_key(task_id)
    }

    /// Listeners for one event: per-task first, then global, each in registration order.
    pub fn matching(&self, task_id: &TaskId) -> Vec<Listener> {
        self.per_task
            .get(task_id)
            .into_iter()
            .flatten()
            .chain(self.global.iter())
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

/// Invoke listeners one by one. A panicking listener is logged and skipped.
pub(crate) fn notify_listeners(listeners: &[Listener], event: &TaskEvent) {
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
            error!(
                queue = %event.queue_name,
                task_id = %event.task_id,
                panic = %panic_message(panic.as_ref()),
                "event listener panicked"
            );
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventStatus;
    use std::sync::Mutex;
    use std::time::Duration;

    fn event(task: &str) -> TaskEvent {
        TaskEvent {
            task_id: TaskId::new(task),
            queue_name: "q".to_string(),
            status: EventStatus::Completed,
            data: None,
            result: None,
            error: None,
            duration: Duration::from_millis(1),
            retry_count: 0,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Listener {
        let log = Arc::clone(log);
        listener(move |_| log.lock().unwrap().push(name))
    }

    #[test]
    fn per_task_listeners_run_before_global() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        reg.add_global(recorder(&log, "g1"));
        reg.add_task(TaskId::new("a"), recorder(&log, "t1"));
        reg.add_global(recorder(&log, "g2"));
        reg.add_task(TaskId::new("a"), recorder(&log, "t2"));
        reg.add_task(TaskId::new("b"), recorder(&log, "other"));

        notify_listeners(&reg.matching(&TaskId::new("a")), &event("a"));
        assert_eq!(*log.lock().unwrap(), vec!["t1", "t2", "g1", "g2"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_siblings() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        reg.add_global(listener(|_| panic!("listener bug")));
        reg.add_global(recorder(&log, "after"));

        notify_listeners(&reg.matching(&TaskId::new("a")), &event("a"));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn removing_last_task_listener_drops_entry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ListenerRegistry::default();
        let a = TaskId::new("a");
        let l1 = reg.add_task(a.clone(), recorder(&log, "1"));
        let l2 = reg.add_task(a.clone(), recorder(&log, "2"));

        assert!(reg.remove_task(&a, l1));
        assert!(reg.has_task_entry(&a));
        assert!(reg.remove_task(&a, l2));
        assert!(!reg.has_task_entry(&a));
        assert!(!reg.remove_task(&a, l2));
    }

    #[test]
    fn remove_global_reports_whether_it_existed() {
        let mut reg = ListenerRegistry::default();
        let id = reg.add_global(listener(|_| {}));
        assert!(reg.remove_global(id));
        assert!(!reg.remove_global(id));
    }

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let p: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(p.as_ref()), "static");
        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(p.as_ref()), "owned");
        let p: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert!(panic_message(p.as_ref()).contains("non-string"));
    }
}
