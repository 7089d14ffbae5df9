//! Mesh devices.
//!
//! | Sub-module | Contents |
//! |---|---|
//! | [`id`] | [`DeviceId`], [`ShortAddress`], [`ExtendedAddress`] |
//! | [`state`] | [`Device`], [`Role`], [`JoinPhase`], [`JoinState`] |

pub mod id;
pub mod state;

pub use id::{DeviceId, ExtendedAddress, ShortAddress};
pub use state::{Device, JoinPhase, JoinState, Role};
