//! 命令定义和实现

pub mod connection;
pub mod diag;
pub mod gcode;
pub mod jog;
pub mod kinematics;
pub mod r#move;
pub mod ports;
pub mod run;
pub mod status;

pub use connection::{ConnectionArgs, install_interrupt_handler};
pub use diag::DiagCommand;
pub use gcode::GcodeCommand;
pub use jog::JogCommand;
pub use kinematics::{FkCommand, IkCommand};
pub use r#move::MoveCommand;
pub use run::RunCommand;
pub use status::StatusCommand;
