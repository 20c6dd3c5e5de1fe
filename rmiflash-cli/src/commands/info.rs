//! Device info command implementation.

use anyhow::Result;
use console::style;
use rmiflash::{Flasher, FlashInfo, FunctionDescriptor, TransportKind};
use serde::Serialize;

use crate::Cli;
use crate::commands::open_flasher;
use crate::config::Config;

/// What `info --json` prints.
#[derive(Debug, Serialize)]
struct InfoReport<'a> {
    transport: TransportKind,
    bootloader: bool,
    firmware_size: usize,
    config_size: usize,
    flash: &'a FlashInfo,
    functions: &'a [FunctionDescriptor],
}

impl<'a> InfoReport<'a> {
    fn new(flasher: &'a dyn Flasher) -> Self {
        let flash = flasher.flash_info();
        Self {
            transport: flasher.kind(),
            bootloader: flasher.is_bootloader(),
            firmware_size: flash.firmware_size(),
            config_size: flash.config_size(),
            flash,
            functions: flasher.functions().functions(),
        }
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut flasher = open_flasher(cli, config)?;

    if json {
        let report = InfoReport::new(flasher.as_ref());
        let output = serde_json::json!({
            "ok": true,
            "data": report,
        });
        let printed = serde_json::to_string_pretty(&output);
        flasher.close();
        println!("{}", printed?);
        return Ok(());
    }

    print_info(flasher.as_ref());
    flasher.close();
    Ok(())
}

fn print_info(flasher: &dyn Flasher) {
    let info = flasher.flash_info();

    println!("{}", style("Device").bold().underlined());
    println!("  Transport:   {}", flasher.kind());
    println!(
        "  Mode:        {}",
        if flasher.is_bootloader() {
            style("bootloader").yellow()
        } else {
            style("runtime").green()
        }
    );

    println!();
    println!("{}", style("Flash").bold().underlined());
    println!(
        "  Bootloader ID:  {:02x} {:02x}",
        info.bootloader_id[0], info.bootloader_id[1]
    );
    println!("  Block size:     {} bytes", info.block_size);
    println!(
        "  Firmware:       {} blocks ({} bytes)",
        info.block_count_firmware,
        info.firmware_size()
    );
    println!(
        "  Config:         {} blocks ({} bytes)",
        info.block_count_config,
        info.config_size()
    );
    println!("  Status reg:     0x{:04x}", info.status_addr);
    if info.has_secure_update {
        println!("  Secure update:  RSA-{}", u32::from(info.rsa_key_length) * 8);
    }

    println!();
    println!("{}", style("Functions").bold().underlined());
    for func in flasher.functions().functions() {
        println!(
            "  {} v{}  query 0x{:04x}  cmd 0x{:04x}  ctrl 0x{:04x}  data 0x{:04x}  irq {}/0x{:02x}",
            style(format!("F{:02X}", func.id)).cyan(),
            func.version,
            func.query_base,
            func.command_base,
            func.control_base,
            func.data_base,
            func.interrupt_reg_num,
            func.interrupt_mask
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_lowercase_transport() {
        let flash = FlashInfo {
            block_size: 16,
            block_count_firmware: 2,
            block_count_config: 1,
            status_addr: 0x0052,
            ..FlashInfo::default()
        };
        let report = InfoReport {
            transport: TransportKind::Ps2,
            bootloader: true,
            firmware_size: flash.firmware_size(),
            config_size: flash.config_size(),
            flash: &flash,
            functions: &[],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["transport"], "ps2");
        assert_eq!(value["firmware_size"], 32);
        assert_eq!(value["flash"]["block_size"], 16);
        assert!(value["functions"].as_array().unwrap().is_empty());
    }
}
