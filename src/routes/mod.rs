//! Route modules for Fableport Server

pub mod imports;
