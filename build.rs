// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{Context, Result};
use cargo_metadata::MetadataCommand;
use serde::Serialize;
use std::collections::HashSet;
use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

#[derive(Debug, Serialize)]
struct PackageInfo {
    name: String,
    license: Option<String>,
    licenses: Vec<String>,
    authors: Vec<String>,
    repository: Option<String>,
    version: String,
}

/// Splits an SPDX license expression into its individual identifiers.
fn split_license(license: &str) -> Vec<String> {
    license
        .split(|c: char| c == '/' || c.is_whitespace())
        .map(|s| s.trim_matches(|c| c == '(' || c == ')'))
        .filter(|s| {
            let upper = s.to_ascii_uppercase();
            !s.is_empty() && upper != "AND" && upper != "OR" && upper != "WITH"
        })
        .map(|s| s.to_string())
        .collect()
}

fn get_packages_info() -> Result<Vec<PackageInfo>> {
    let metadata = MetadataCommand::new()
        .exec()
        .context("Failed to execute cargo metadata")?;

    Ok(metadata
        .packages
        .into_iter()
        .map(|package| PackageInfo {
            name: package.name.to_string(),
            license: package.license.clone(),
            licenses: package
                .license
                .as_ref()
                .map(|l| split_license(l))
                .unwrap_or_default(),
            authors: package.authors,
            version: package.version.to_string(),
            repository: package.repository,
        })
        .collect())
}

/// Generates a file in OUT_DIR containing a constant with the aggregated
/// third-party license notice for every dependency pulled in by Cargo.lock.
fn generate_license_notice() -> Result<()> {
    let packages_info = get_packages_info()?;

    let mut notice = String::new();
    let mut oss_licenses: Vec<String> = vec![];
    notice.push_str(
        "This software is licensed under the SCTG Development Non-Commercial License v1.0.\n",
    );
    notice.push_str("For more information, see the LICENSE.md file in the root of this project.\n");
    notice.push_str("(c) Ronan LE MEILLAT, SCTG Development\n");
    notice.push_str("---\n");
    notice.push_str("This software contains Open Source Software (OSS) components:\n");

    for package in packages_info {
        let authors = package.authors.join(", ");
        let license = package.license.unwrap_or_else(|| "Unknown".to_string());
        notice.push_str(&format!(
            "- {} ({}) - {} - {} - {}\n",
            package.name,
            package.version,
            license,
            authors,
            package
                .repository
                .unwrap_or_else(|| "No repository".to_string())
        ));
        oss_licenses.extend(package.licenses);
    }

    let oss_licenses: Vec<String> = oss_licenses.into_iter().collect::<HashSet<_>>().into_iter().collect();

    notice.push_str("---\n");
    notice.push_str("You can find the full text of the licenses used by the dependencies at the following URLs:\n");
    for license in oss_licenses {
        match license.as_str() {
            "Apache-2.0" => notice.push_str("- Apache-2.0: https://opensource.org/license/apache-2-0/\n"),
            "MIT" => notice.push_str("- MIT: https://opensource.org/license/mit/\n"),
            "BSD-2-Clause" => notice.push_str("- BSD-2-Clause: https://opensource.org/license/bsd-2-clause/\n"),
            "BSD-3-Clause" => notice.push_str("- BSD-3-Clause: https://opensource.org/license/bsd-3-clause/\n"),
            "ISC" => notice.push_str("- ISC: https://opensource.org/license/isc/\n"),
            "Unicode-3.0" => notice.push_str("- Unicode-3.0: https://opensource.org/license/unicode-3-0/\n"),
            "Zlib" => notice.push_str("- Zlib: https://opensource.org/license/zlib/\n"),
            other => notice.push_str(&format!("- {}: Unknown license URL\n", other)),
        }
    }
    notice.push_str("---\n");
    notice.push_str("Please note that this software is an original work and does not constitute a derivative work of any of its dependencies.\n");

    let out_dir = env::var("OUT_DIR")?;
    let file_path = PathBuf::from(out_dir).join("license_notice.rs");
    let mut file = File::create(file_path)?;
    writeln!(file, "pub const LICENSE_NOTICE: &str = r#\"{}\"#;", notice)?;

    Ok(())
}

/// Regenerates the license notice only when Cargo.lock actually changed,
/// so incremental builds do not re-run `cargo metadata` every time.
fn run_generate_license_notice_if_needed() -> Result<()> {
    use sha2::{Digest, Sha256};

    let cargo_lock_path = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("Cargo.lock");
    if !cargo_lock_path.exists() {
        return generate_license_notice();
    }

    let cargo_lock_content = fs::read_to_string(&cargo_lock_path)?;
    let mut hasher = Sha256::new();
    hasher.update(cargo_lock_content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let hash_file_path = PathBuf::from(env::var("OUT_DIR")?).join("cargo_lock_hash.txt");
    let previous_hash = fs::read_to_string(&hash_file_path).unwrap_or_default();

    if previous_hash.trim() == hash.trim() {
        return Ok(());
    }

    generate_license_notice()?;
    fs::write(&hash_file_path, hash)?;
    Ok(())
}

fn get_git_info() -> Result<(String, String, String)> {
    let commit_hash_short = Command::new("git")
        .args(&["rev-parse", "--short", "HEAD"])
        .output()
        .context("Failed to execute git rev-parse --short HEAD")?;
    let commit_hash_full = Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()
        .context("Failed to execute git rev-parse HEAD")?;
    let commit_date = Command::new("git")
        .args(&["log", "-1", "--format=%ci"])
        .output()
        .context("Failed to execute git log for commit date")?;
    let git_status = Command::new("git")
        .args(&["status", "--porcelain"])
        .output()
        .context("Failed to execute git status")?;

    if !commit_hash_full.status.success() {
        return Err(anyhow::anyhow!("git rev-parse failed"));
    }

    let is_dirty = !git_status.stdout.is_empty();
    let short_hash = String::from_utf8_lossy(&commit_hash_short.stdout).trim().to_string();
    let full_hash = String::from_utf8_lossy(&commit_hash_full.stdout).trim().to_string();
    let date = String::from_utf8_lossy(&commit_date.stdout).trim().to_string();

    let suffix = if is_dirty { "-dirty" } else { "" };
    Ok((
        format!("{}{}", short_hash, suffix),
        format!("{}{}", full_hash, suffix),
        date,
    ))
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-changed=Cargo.lock");

    if let Err(e) = run_generate_license_notice_if_needed() {
        println!("cargo:warning=Failed to generate license notice: {}", e);
    }

    match get_git_info() {
        Ok((short_hash, full_hash, commit_date)) => {
            println!("cargo:rustc-env=GIT_COMMIT_HASH_SHORT={}", short_hash);
            println!("cargo:rustc-env=GIT_COMMIT_HASH_FULL={}", full_hash);
            println!("cargo:rustc-env=GIT_COMMIT_DATE={}", commit_date);
        }
        Err(e) => {
            println!("cargo:warning=Failed to get Git information: {}", e);
            println!("cargo:rustc-env=GIT_COMMIT_HASH_SHORT=unknown");
            println!("cargo:rustc-env=GIT_COMMIT_HASH_FULL=unknown");
            println!("cargo:rustc-env=GIT_COMMIT_DATE=unknown");
        }
    }

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp);
    println!(
        "cargo:rustc-env=BUILD_RUSTC_VERSION={}",
        env::var("RUSTC_VERSION").unwrap_or_else(|_| "unknown".to_string())
    );
    println!(
        "cargo:rustc-env=BUILD_TARGET={}",
        env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}
