// Library management module
// This module handles track listing for the music directory

pub mod scanner;

pub use scanner::Library;
