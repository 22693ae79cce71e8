//! Drain handle returned by `Queue::stop`.

use std::future::IntoFuture;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;

/// Resolves once the queue has no running task.
///
/// - clone しても同じ drain を待つ（`stop()` を何度呼んでも同じ handle）
/// - timeout はない。hung した callable があれば永遠に待つ
/// - `.await` でも `wait()` でも待てる
#[derive(Debug, Clone)]
pub struct DrainHandle {
    rx: watch::Receiver<bool>,
}

impl DrainHandle {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_drained(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(mut self) {
        // sender が drop された場合（runtime 終了時）も待つのをやめる
        let _ = self.rx.wait_for(|drained| *drained).await;
    }
}

impl IntoFuture for DrainHandle {
    type Output = ();
    type IntoFuture = BoxFuture<'static, ()>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}
