//! ports 命令

use armlink_sdk::list_ports;

/// 列出可用串口
pub fn execute() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("未发现串口");
        return;
    }
    println!("📋 可用串口:");
    for port in ports {
        println!("  {:<20} {}", port.name, port.description);
    }
}
