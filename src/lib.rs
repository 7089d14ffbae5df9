//! # meshcoex: deterministic mesh / WLAN coexistence simulator
//!
//! A Zigbee-style mesh (one coordinator, N routers) forms, joins and
//! exchanges heartbeat traffic while saturating WLAN flows share the
//! medium. Everything runs on a virtual clock: same seed, same report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │          Scenario             │ ← config → initial events
//! │  ┌────────────────────────┐  │
//! │  │      CoexRuntime        │  │ ← dispatches events
//! │  │  orchestrator · nwk     │  │ ← join state machine, routing
//! │  │  heartbeat · qos        │  │ ← traffic and measurement
//! │  │  medium · wlan · route  │  │ ← shared channel, flows, traces
//! │  └────────────────────────┘  │
//! │  ┌────────────────────────┐  │
//! │  │  Simulation/Scheduler   │  │ ← deterministic min-heap
//! │  └────────────────────────┘  │
//! └──────────────────────────────┘
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod medium;
pub mod nwk;
pub mod orchestrator;
pub mod qos;
pub mod report;
pub mod route;
pub mod runtime;
pub mod scenario;
pub mod scheduler;
pub mod simulation;
pub mod time;
pub mod wlan;

// Re-exports for convenience.
pub use config::ScenarioConfig;
pub use device::{Device, DeviceId, ExtendedAddress, JoinPhase, Role, ShortAddress};
pub use error::{CoexError, CoexResult};
pub use event::{Event, EventId, EventIdGen, EventType};
pub use heartbeat::{HeartbeatEngine, HeartbeatRecord};
pub use medium::{Medium, MediumConfig, MediumStats};
pub use nwk::{MeshNwk, NwkConfig, NwkConfirm, NwkStatus, Topology};
pub use orchestrator::{JoinOrchestrator, JoinParams, JoinPolicy};
pub use qos::{QosEngine, QosRow};
pub use report::SimulationReport;
pub use route::{RouteTrace, TraceOutcome};
pub use runtime::CoexRuntime;
pub use scenario::{Scenario, ScenarioBuilder};
pub use scheduler::Scheduler;
pub use simulation::{EventHandler, Simulation, SimulationContext};
pub use time::VirtualTime;
pub use wlan::{WlanConfig, WlanTraffic};
