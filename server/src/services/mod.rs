//! Business logic, kept free of transport concerns so tests can exercise it
//! without sockets.

pub mod ingest;
