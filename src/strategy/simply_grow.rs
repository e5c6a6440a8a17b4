//! Simply-Grow Loop
//!
//! Simply-grow holds the deposit and does nothing with it until the
//! order is stopped. The loop only watches the order row so the
//! registry reaps it once the state leaves `running`.

use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::core_types::OrderId;
use crate::orders::state::OrderState;
use crate::orders::SimplyGrowOrderStore;

use super::registry::StopSignal;

const IDLE_INTERVAL: Duration = Duration::from_secs(60);

pub struct SimplyGrowLoop {
    orders: SimplyGrowOrderStore,
    order_id: OrderId,
}

impl SimplyGrowLoop {
    pub fn new(orders: SimplyGrowOrderStore, order_id: OrderId) -> Self {
        Self { orders, order_id }
    }

    pub async fn run(self, mut stop: StopSignal) {
        info!(order_id = %self.order_id, "Simply-grow loop starting");
        loop {
            if stop.is_stopped() {
                break;
            }
            match self.orders.get(self.order_id).await {
                Ok(Some(order)) if order.state == OrderState::Running => {}
                Ok(Some(order)) => {
                    info!(
                        order_id = %self.order_id,
                        state = %order.state,
                        "Simply-grow order no longer running, loop exiting"
                    );
                    break;
                }
                Ok(None) => {
                    warn!(order_id = %self.order_id, "Simply-grow order row disappeared");
                    break;
                }
                Err(e) => {
                    error!(order_id = %self.order_id, error = %e, "Simply-grow order load failed");
                }
            }
            tokio::select! {
                _ = sleep(IDLE_INTERVAL) => {}
                _ = stop.stopped() => break,
            }
        }
        info!(order_id = %self.order_id, "Simply-grow loop exited");
    }
}
