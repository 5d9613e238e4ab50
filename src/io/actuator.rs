//! Gate motor driven through two relay outputs
//!
//! One line drives the motor open, the other closed. Both low stops it. The
//! opposite line is always released before a line is raised so the relays
//! never drive the motor both ways at once.

use crate::io::sensors::OutputPin;
use crate::services::gate::{GateActuator, GateMotion};
use std::io;
use tracing::trace;

pub struct PinActuator<P: OutputPin> {
    open: P,
    close: P,
}

impl<P: OutputPin> PinActuator<P> {
    pub fn new(open: P, close: P) -> Self {
        Self { open, close }
    }
}

impl<P: OutputPin> GateActuator for PinActuator<P> {
    fn drive(&mut self, motion: GateMotion) -> io::Result<()> {
        trace!(motion = ?motion, "gate_actuator_drive");
        match motion {
            GateMotion::Open => {
                self.close.set_level(false)?;
                self.open.set_level(true)
            }
            GateMotion::Close => {
                self.open.set_level(false)?;
                self.close.set_level(true)
            }
            GateMotion::Stop => {
                // Release both even if the first write fails
                let open = self.open.set_level(false);
                let close = self.close.set_level(false);
                open.and(close)
            }
        }
    }
}
