// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution engines.
//!
//! An [`Agent`] turns a call descriptor plus the call's input and output into
//! a runnable [`Call`]. The engagement session only talks to this seam.

pub mod echo;
pub mod mock;
pub mod process;
mod slots;
mod traits;

use std::sync::Arc;

use crate::config::{Config, EngineKind};

pub use echo::EchoAgent;
pub use mock::MockAgent;
pub use process::ProcessAgent;
pub use slots::{Slot, SlotPool};
pub use traits::*;

/// Build the engine selected by the configuration.
pub fn from_config(config: &Config) -> Result<Arc<dyn Agent>, AgentError> {
    let slots = SlotPool::new(config.max_concurrent_calls, config.slot_timeout);
    let agent: Arc<dyn Agent> = match config.engine {
        EngineKind::Echo => Arc::new(EchoAgent::new(slots)),
        EngineKind::Process => Arc::new(ProcessAgent::new(config.command.clone(), slots)?),
    };
    Ok(agent)
}
