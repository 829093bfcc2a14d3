//! Clock source node.

use crate::property::{PropertyId, PropertyPool};
use crate::value::PropertyValue;
use std::time::Instant;

/// Forwards a host-driven tick time, or samples its own monotonic clock
/// when the host leaves the input at zero. The clock restarts with the
/// node; nothing of it is persisted.
#[derive(Debug)]
pub struct TimerNode {
    epoch: Instant,
    /// True while the node runs on its own clock; keeps it scheduled
    /// although no input changes.
    auto: bool,
}

impl TimerNode {
    pub(crate) fn new() -> Self {
        TimerNode {
            epoch: Instant::now(),
            auto: false,
        }
    }

    pub(crate) fn wants_update(&self) -> bool {
        self.auto
    }

    pub(crate) fn update(
        &mut self,
        input: Option<PropertyId>,
        output: Option<PropertyId>,
        pool: &mut PropertyPool,
    ) -> Result<(), String> {
        let (input, output) = match (input, output) {
            (Some(input), Some(output)) => (input, output),
            _ => return Err("timer node has no property trees".into()),
        };
        let tick_prop = pool
            .child_by_index(input, 0)
            .ok_or("timer input schema is incomplete")?;
        let tick: f32 = pool
            .get_value(tick_prop)
            .ok_or("timer tick input has an unexpected type")?;
        if tick < 0.0 {
            return Err(format!("cannot use negative tick time ({tick})"));
        }
        self.auto = tick == 0.0;
        let time = if tick > 0.0 {
            tick
        } else {
            self.epoch.elapsed().as_secs_f32()
        };
        let time_prop = pool
            .child_by_index(output, 0)
            .ok_or("timer output schema is incomplete")?;
        pool.set_node_output(time_prop, PropertyValue::Float(time))
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
