//! # IO Layer
//!
//! Translates between the outside world and the domain services. The only
//! transport is REST over HTTP; handlers stay thin and hold no business rules.

pub mod rest;
