//! Connection hub tests over in-memory sockets

mod connection_tests;
mod dispatcher_tests;
