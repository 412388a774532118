//! Supervisor running one control loop per workload

use super::ControlLoop;
use crate::observability::ControllerMetrics;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct Controller {
    loops: Vec<ControlLoop>,
}

impl Controller {
    pub fn new(loops: Vec<ControlLoop>) -> Self {
        Self { loops }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Spawn every loop, each subscribed to `shutdown`
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> ControllerHandle {
        ControllerMetrics::new().set_workloads_monitored(self.loops.len() as i64);

        let tasks = self
            .loops
            .into_iter()
            .map(|control_loop| {
                let workload = control_loop.workload().to_string();
                let handle = tokio::spawn(control_loop.run(shutdown.subscribe()));
                (workload, handle)
            })
            .collect();

        ControllerHandle { tasks }
    }
}

/// Running loops of a [`Controller`]
pub struct ControllerHandle {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl ControllerHandle {
    /// Wait for every loop to stop
    pub async fn wait(self) {
        for (workload, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(workload = %workload, error = %e, "Control loop task failed");
            }
        }
        ControllerMetrics::new().set_workloads_monitored(0);
        info!("All control loops stopped");
    }
}
