//! Background inactivity sweeper: ticks on a fixed interval and asks the
//! controller to nudge users who went quiet mid-adventure or mid-creation.

use crate::controller::Controller;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn(controller: Arc<Controller>) -> JoinHandle<()> {
    let interval_secs = controller.services().config.sweep.interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            controller.sweep_inactive().await;
        }
    })
}
