//! Building blocks of one pipeline stage.
//!
//! Each submodule implements exactly one step. Keeping them separate makes
//! each independently testable and lets a new vendor be added without
//! touching the polling or orchestration logic.
//!
//! ## Data Flow (per stage)
//!
//! ```text
//! normalize ──▶ upload ──▶ submit ──▶ poll ──▶ fetch
//! (validate,    (bytes →   (vendor    (bounded  (URL →
//!  downscale)    URL)       adapter)   retry)    bytes)
//! ```
//!
//! 1. [`normalize`]: format/size checks and downscaling; pure, no I/O
//! 2. [`upload`]   : only for reference-based services
//! 3. [`service`]  : the [`service::JobService`] trait, implemented by
//!    [`faceswap`], [`cartoon`] and [`portrait`]
//! 4. [`poll`]     : the bounded polling state machine
//! 5. [`fetch`]    : materialize the result bytes

pub mod cartoon;
pub mod faceswap;
pub mod fetch;
pub mod normalize;
pub mod poll;
pub mod portrait;
pub mod service;
pub mod upload;
