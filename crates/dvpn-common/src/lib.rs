//! Shared configuration for the dVPN node daemon.

pub mod config;
