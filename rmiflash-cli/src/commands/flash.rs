//! Flash command implementation.

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rmiflash::{FlashInfo, Flasher};
use std::path::Path;

use crate::commands::open_flasher;
use crate::config::Config;
use crate::{Cli, use_fancy_output};

/// Check that both images fill exactly the blocks the device reports.
fn check_image_sizes(info: &FlashInfo, firmware: usize, config: usize) -> Result<()> {
    if info.block_size == 0 {
        bail!("device reports a flash block size of zero");
    }
    if firmware != info.firmware_size() {
        bail!(
            "firmware image is {firmware} bytes, device expects {} ({} blocks of {})",
            info.firmware_size(),
            info.block_count_firmware,
            info.block_size
        );
    }
    if config != info.config_size() {
        bail!(
            "config image is {config} bytes, device expects {} ({} blocks of {})",
            info.config_size(),
            info.block_count_config,
            info.block_size
        );
    }
    Ok(())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    config_image: &Path,
    enter_bootloader: bool,
) -> Result<()> {
    let fw_data = std::fs::read(firmware)
        .with_context(|| format!("failed to read firmware image {}", firmware.display()))?;
    let cfg_data = std::fs::read(config_image)
        .with_context(|| format!("failed to read config image {}", config_image.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded firmware ({} bytes) and config ({} bytes)",
            style("📦").cyan(),
            fw_data.len(),
            cfg_data.len()
        );
    }

    let mut flasher = open_flasher(cli, config)?;
    if let Err(err) = flash_images(cli, flasher.as_mut(), &fw_data, &cfg_data, enter_bootloader)
    {
        flasher.close();
        return Err(err);
    }

    flasher.close();

    if !cli.quiet {
        eprintln!("\n{} Flashing completed", style("🎉").green().bold());
    }
    Ok(())
}

fn flash_images(
    cli: &Cli,
    flasher: &mut dyn Flasher,
    firmware: &[u8],
    config: &[u8],
    enter_bootloader: bool,
) -> Result<()> {
    if !flasher.is_bootloader() {
        if !enter_bootloader {
            bail!("device is not in bootloader mode; rerun with --enter-bootloader");
        }
        if !cli.quiet {
            eprintln!("{} Entering flash programming mode", style("⏳").yellow());
        }
        flasher
            .enter_flash_programming()
            .context("failed to enter flash programming mode")?;
    }

    check_image_sizes(flasher.flash_info(), firmware.len(), config.len())?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    if !cli.quiet {
        eprintln!("{} Erasing and writing flash", style("⚡").cyan());
    }
    flasher.write_firmware(firmware, config, &mut |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    Ok(())
}
