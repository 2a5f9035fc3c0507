// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared plumbing for batch-scheduler engines.

use crate::EngineTaskState;
use std::collections::HashMap;
use tokio::process::Command;

/// Tick-consistent queue snapshot: (queue name, shard) -> state.
pub type QueueSnapshot = HashMap<(String, usize), EngineTaskState>;

/// Build the submission/query command, optionally tunneled through a
/// gateway host with ssh. The remote side changes into the current working
/// directory first so relative worker calls resolve.
pub fn backend_command(gateway: Option<&str>, argv: &[String]) -> Command {
    match gateway {
        None => {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        }
        Some(host) => {
            let cwd = std::env::current_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|_| ".".to_string());
            let mut remote = vec!["cd".to_string(), cwd, "&&".to_string()];
            remote.extend(argv.iter().cloned());
            let mut cmd = Command::new("ssh");
            cmd.arg("-x")
                .arg(host)
                .arg("-o")
                .arg("BatchMode=yes")
                .arg(remote.join(" "));
            cmd
        }
    }
}

/// Split sorted shard ids into maximal contiguous ranges for array
/// submission (`-t a-b`).
pub fn contiguous_ranges(shards: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted: Vec<usize> = shards.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return ranges;
    };
    let (mut start, mut end) = (first, first);
    for shard in iter {
        if shard == end + 1 {
            end = shard;
        } else {
            ranges.push((start, end));
            start = shard;
            end = shard;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Expand an array-task expression (`1-4`, `1-7:2`, `3`, `2,5`) into ids.
pub fn expand_task_ids(expr: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for part in expr.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (range, step) = match part.split_once(':') {
            Some((r, s)) => (r, s.parse().unwrap_or(1)),
            None => (part, 1usize),
        };
        match range.split_once('-') {
            Some((a, b)) => {
                if let (Ok(a), Ok(b)) = (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
                    let mut i = a;
                    while i <= b {
                        out.push(i);
                        i += step.max(1);
                    }
                }
            }
            None => {
                if let Ok(id) = range.parse::<usize>() {
                    out.push(id);
                }
            }
        }
    }
    out
}

/// Extract the text of every `<tag>...</tag>` occurrence, in order.
///
/// The qstat XML dialect is flat and attribute-free where we read it, so a
/// full XML parser buys nothing over scanning matched tag pairs.
pub fn xml_tag_values<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start + open.len()..];
        let Some(end) = rest.find(&close) else { break };
        out.push(&rest[..end]);
        rest = &rest[end + close.len()..];
    }
    out
}

/// Split a document into chunks, one per `<tag ...>...</tag>` element.
pub fn xml_elements<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start..];
        let Some(end) = rest.find(&close) else { break };
        out.push(&rest[..end + close.len()]);
        rest = &rest[end + close.len()..];
    }
    out
}

/// Username for queue filtering.
pub fn current_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod tests;
