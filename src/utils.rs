//! Helpers shared by the CLI commands for reporting sizes and progress.

use crate::constants::{
    COMPRESSED_SIZE_PREFIX, COMPRESSION_RATIO_PREFIX, ORIGINAL_SIZE_PREFIX, PROGRESS_BAR_TEMPLATE,
    PROGRESS_SPINNER_TEMPLATE, SUCCESS_PREFIX, WARNING_PREFIX,
};
use crate::video_compressor::PercentCallback;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

/// Format file size in human-readable format
///
/// # Arguments
/// * `bytes` - Size in bytes
///
/// # Returns
/// * Human-readable size string (e.g., "1.2 MB", "512 B")
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= THRESHOLD && unit_index < UNITS.len() - 1 {
        size /= THRESHOLD;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

/// Calculate size reduction as a percentage
///
/// # Arguments
/// * `original_size` - Size before compression in bytes
/// * `compressed_size` - Size after compression in bytes
///
/// # Returns
/// * Reduction in percent; negative when the output grew, 0 for an empty original
pub fn calculate_compression_ratio(original_size: u64, compressed_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    ((original_size as f64 - compressed_size as f64) / original_size as f64) * 100.0
}

/// Print original size, compressed size and ratio with the usual prefixes
///
/// # Arguments
/// * `original_size` - Size before compression in bytes
/// * `compressed_size` - Size after compression in bytes
pub fn print_compression_result(original_size: u64, compressed_size: u64) {
    let ratio = calculate_compression_ratio(original_size, compressed_size);

    println!(
        "{} {} ({})",
        ORIGINAL_SIZE_PREFIX,
        original_size,
        format_file_size(original_size)
    );
    println!(
        "{} {} ({})",
        COMPRESSED_SIZE_PREFIX,
        compressed_size,
        format_file_size(compressed_size)
    );
    println!("{} {:.1}%", COMPRESSION_RATIO_PREFIX, ratio);

    if ratio > 0.0 {
        println!("{} Reduced file size by {:.1}%", SUCCESS_PREFIX, ratio);
    } else if ratio < 0.0 {
        println!("{}  File size increased by {:.1}%", WARNING_PREFIX, ratio.abs());
    }
}

/// Create a progress spinner with consistent styling
///
/// # Arguments
/// * `message` - Initial message to display
///
/// # Returns
/// * Configured `ProgressBar` instance
pub fn create_progress_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template(PROGRESS_SPINNER_TEMPLATE) {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb
}

/// Create a 0-100 bar driven by pipeline progress
///
/// # Arguments
/// * `message` - Label shown next to the bar
///
/// # Returns
/// * The bar, and a `PercentCallback` that moves it
pub fn create_percent_bar(message: &str) -> (ProgressBar, PercentCallback) {
    let pb = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(message.to_string());

    let handle = pb.clone();
    let callback: PercentCallback = Arc::new(move |percent| handle.set_position(percent as u64));
    (pb, callback)
}
