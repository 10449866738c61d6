//! Nachrichten-Handler der beiden Broker-Rollen
//!
//! Jede Rolle hat ihren eigenen Listener und Dispatcher; die Handler werden
//! beim Start ueber `registrieren` in den jeweiligen
//! [`DispatcherBuilder`](fernlink_dispatch::DispatcherBuilder) eingetragen.

pub mod controlled;
pub mod controlling;
