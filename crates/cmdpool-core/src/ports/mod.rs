//! Ports - プールが外部に要求するインターフェース
//!
//! The pool only depends on the traits defined here. Concrete commands live in
//! `impls`.

pub mod command;

pub use self::command::{Command, Executable};
