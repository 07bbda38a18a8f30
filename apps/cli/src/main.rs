//! # Armlink CLI
//!
//! 串口机械臂的命令行工具。
//!
//! ```bash
//! # 列出串口
//! armlink-cli ports
//!
//! # 离线运动学
//! armlink-cli fk 0 45 0
//! armlink-cli ik 200 0 150
//!
//! # 连接并操作（每条命令：连接 -> 执行 -> 断开）
//! armlink-cli --port /dev/ttyUSB0 jog X 10
//! armlink-cli --config devices.toml --device arm1 move --axes 10,20,0
//! armlink-cli --port /dev/ttyUSB0 --dialect grbl move --xyz 200,0,150 --linear
//! armlink-cli --port /dev/ttyUSB0 run part.gcode
//!
//! # 诊断
//! armlink-cli --port /dev/ttyUSB0 diag endstops --axes XY
//! armlink-cli --port /dev/ttyUSB0 diag probe --json -o probe.json
//! armlink-cli --port /dev/ttyUSB0 diag board --move
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod validation;

use commands::{
    ConnectionArgs, DiagCommand, FkCommand, GcodeCommand, IkCommand, JogCommand, MoveCommand,
    RunCommand, StatusCommand, install_interrupt_handler,
};

/// Armlink CLI - 串口机械臂命令行工具
#[derive(Parser, Debug)]
#[command(name = "armlink-cli")]
#[command(about = "Command-line interface for serial robot arm control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出可用串口
    Ports,

    /// 正运动学：关节角 → 末端位置
    Fk {
        #[command(flatten)]
        args: FkCommand,
    },

    /// 逆运动学：末端位置 → 关节角
    Ik {
        #[command(flatten)]
        args: IkCommand,
    },

    /// 查询设备状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 单轴相对点动
    Jog {
        #[command(flatten)]
        args: JogCommand,
    },

    /// 绝对运动
    Move {
        #[command(flatten)]
        args: MoveCommand,
    },

    /// 发送原始 G-code
    Gcode {
        #[command(flatten)]
        args: GcodeCommand,
    },

    /// 执行 G-code 文件
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 诊断工具
    #[command(subcommand)]
    Diag(DiagCommand),
}

fn main() -> Result<()> {
    armlink_sdk::init_logging("armlink=info,armlink_cli=info");

    let cli = Cli::parse();
    let connection = &cli.connection;

    match &cli.command {
        Commands::Ports => {
            commands::ports::execute();
            Ok(())
        },

        Commands::Fk { args } => args.execute(&connection.driver_config()?.robot),

        Commands::Ik { args } => args.execute(&connection.driver_config()?.robot),

        Commands::Status { args } => {
            let driver = connection.connect()?;
            args.execute(&driver)
        },

        Commands::Jog { args } => {
            let driver = connection.connect()?;
            args.execute(&driver)
        },

        Commands::Move { args } => {
            let driver = connection.connect()?;
            args.execute(&driver)
        },

        Commands::Gcode { args } => {
            let driver = connection.connect()?;
            args.execute(&driver)
        },

        Commands::Run { args } => {
            let control = install_interrupt_handler()?;
            let driver = connection.connect()?;
            args.execute(&driver, &control)
        },

        Commands::Diag(cmd) => {
            let control = install_interrupt_handler()?;
            let driver = connection.connect()?;
            cmd.execute(&driver, &control)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armlink_sdk::prelude::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_jog_with_negative_distance() {
        let cli = Cli::try_parse_from(["armlink-cli", "--port", "COM3", "jog", "y", "-5"]).unwrap();
        assert_eq!(cli.connection.port.as_deref(), Some("COM3"));
        match cli.command {
            Commands::Jog { args } => {
                assert_eq!(args.axis, Axis::Y);
                assert_eq!(args.distance, -5.0);
                assert_eq!(args.feed, 50.0);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_args_after_subcommand() {
        let cli = Cli::try_parse_from(["armlink-cli", "status", "--dialect", "grbl"]).unwrap();
        assert_eq!(cli.connection.dialect, Some(Dialect::Grbl));
    }

    #[test]
    fn test_parse_diag_motion_speeds() {
        let cli = Cli::try_parse_from([
            "armlink-cli",
            "diag",
            "motion",
            "--axes",
            "XZ",
            "--speeds",
            "10,20,30",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Diag(DiagCommand::Motion {
                axes,
                speeds,
                output,
                ..
            }) => {
                assert_eq!(axes.map(|a| a.len()), Some(2));
                assert_eq!(speeds, Some(vec![10, 20, 30]));
                assert!(output.json);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_diag_board() {
        let cli = Cli::try_parse_from([
            "armlink-cli",
            "diag",
            "board",
            "--move",
            "--no-effectors",
            "--banner-wait",
            "3000",
        ])
        .unwrap();
        match cli.command {
            Commands::Diag(DiagCommand::Board {
                move_test,
                no_effectors,
                banner_wait,
                ..
            }) => {
                assert!(move_test);
                assert!(no_effectors);
                assert_eq!(banner_wait, Some(3000));
            },
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from(["armlink-cli", "diag", "board"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Diag(DiagCommand::Board {
                move_test: false,
                banner_wait: None,
                ..
            })
        ));
    }

    #[test]
    fn test_move_requires_target() {
        assert!(Cli::try_parse_from(["armlink-cli", "move"]).is_err());
        assert!(Cli::try_parse_from(["armlink-cli", "move", "--axes", "1,2,3", "--linear"]).is_err());
    }
}
