#![allow(dead_code)]

pub mod builders;
pub mod processors;
pub mod strategies;

pub use builders::*;
pub use processors::*;
