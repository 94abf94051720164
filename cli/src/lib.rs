#![doc = include_str!("../README.md")]

mod blocks;
mod commit;
mod common;
mod simulation;

pub use common::run;
