//! # Repository Module
//!
//! Database repository implementations for the terminal.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Sync engine pass                                                      │
//! │       │                                                                 │
//! │       │  db.sale_queue().list_pending(50)                              │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  SaleQueueRepository                                                   │
//! │  ├── enqueue(&self, payload_json, key)                                 │
//! │  ├── list_pending(&self, limit)                                        │
//! │  ├── record_failure(&self, id, error)                                  │
//! │  └── remove(&self, id)                                                 │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place                                        │
//! │  • Retry bookkeeping cannot be bypassed                                │
//! │  • Easy to exercise against an in-memory database in tests             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod queue;
