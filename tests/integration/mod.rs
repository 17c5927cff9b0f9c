//! Integration Tests Module
//!
//! End-to-end tests for the remote control session layer, driven through the
//! in-process loopback relay and the headless host.

// Session lifecycle, tier gating, panic priority and expiry
mod remote_session_test;

// Config file to session settings
mod config_test;
