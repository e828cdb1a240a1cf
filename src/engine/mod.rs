// DeviceEngine - single-threaded cooperative tick scheduler
//
// One tick services, in order: one inbound command unit, the active
// mode's per-tick work, and pending telemetry transmission. All mutable
// state is owned by the session and detector and touched only from the
// tick, so the single-writer discipline needs no locking beyond the
// shared telemetry frame.

use std::sync::{Arc, Mutex};

use crate::config::DeviceConfig;
use crate::device::{DeviceIo, TimeSource, Transport};
use crate::error::SessionError;
use crate::protocol::{Dispatch, Dispatcher};
use crate::session::{DeviceMode, Session};
use crate::telemetry::TelemetryFrame;

pub struct DeviceEngine {
    session: Session,
    dispatcher: Dispatcher,
    io: DeviceIo,
    transport: Box<dyn Transport>,
    clock: Box<dyn TimeSource>,
}

impl DeviceEngine {
    /// Assemble an engine around a validated configuration and a set of
    /// collaborators.
    pub fn new(
        config: DeviceConfig,
        io: DeviceIo,
        transport: Box<dyn Transport>,
        clock: Box<dyn TimeSource>,
    ) -> Result<Self, SessionError> {
        let frame = Arc::new(Mutex::new(TelemetryFrame::new()));
        let telemetry_interval_ms = config.telemetry_interval_ms;
        let session = Session::new(config, Arc::clone(&frame))?;
        let dispatcher = Dispatcher::new(frame, telemetry_interval_ms);
        Ok(Self {
            session,
            dispatcher,
            io,
            transport,
            clock,
        })
    }

    /// Run one scheduler tick.
    ///
    /// # Returns
    /// The dispatch outcome when an inbound unit was processed this
    /// tick, `None` otherwise.
    pub fn tick(&mut self) -> Option<Dispatch> {
        let now_ms = self.clock.now_ms();
        let outcome = self.dispatcher.dispatch(
            &mut self.session,
            &mut self.io,
            self.transport.as_mut(),
            now_ms,
        );
        self.session.continue_active(&mut self.io, now_ms);
        self.dispatcher
            .service_telemetry(&self.session, self.transport.as_mut(), now_ms);
        outcome
    }

    pub fn mode(&self) -> DeviceMode {
        self.session.mode()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
