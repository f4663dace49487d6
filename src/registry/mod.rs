//! Component registry and component table
//!
//! The [`Registry`] maps `(role, type tag)` to a typed constructor; the
//! [`ComponentTable`] holds the live instances those constructors produce.
//!
//! # Architecture
//!
//! ```text
//!   config document                Registry                   ComponentTable
//!  ┌──────────────────┐     ┌───────────────────────┐     ┌──────────────────────┐
//!  │ { id, type,      │────►│ (Source, "tcp") ─► F  │────►│ sources: id ─► Arc   │
//!  │   options }      │     │ (Sink,   "rtp") ─► F  │     │ sinks:   id ─► Arc   │
//!  └──────────────────┘     │ (Duplex, "exec")─► F  │     │ components (ordered) │
//!                           └───────────────────────┘     └──────────────────────┘
//!                          decode options once, build,      insert all-or-nothing
//!                          stage derived sinks
//! ```

pub mod factory;
pub mod table;

pub use factory::{BuildContext, Factory, Instance, Registry};
pub use table::ComponentTable;
