//! Tmux layout command builder for 2-6 panes. Pure: produces command
//! vectors, performs no I/O.

use clap::ValueEnum;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Layout {
    #[value(name = "horizontal")]
    Horizontal,
    #[value(name = "vertical")]
    Vertical,
    #[value(name = "grid")]
    Grid,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Horizontal => "horizontal",
            Layout::Vertical => "vertical",
            Layout::Grid => "grid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "horizontal" => Some(Layout::Horizontal),
            "vertical" => Some(Layout::Vertical),
            "grid" => Some(Layout::Grid),
            _ => None,
        }
    }

    fn tmux_layout(&self) -> &'static str {
        match self {
            Layout::Horizontal => "even-horizontal",
            Layout::Vertical => "even-vertical",
            Layout::Grid => "tiled",
        }
    }

    fn split_flag(&self, index: usize) -> &'static str {
        match self {
            Layout::Horizontal => "-h",
            Layout::Vertical => "-v",
            // Grid alternates splits by parity to approximate a tile.
            Layout::Grid => {
                if index % 2 == 1 {
                    "-h"
                } else {
                    "-v"
                }
            }
        }
    }
}

pub fn validate_pane_count(panes: usize) -> Result<()> {
    if !(2..=6).contains(&panes) {
        return Err(Error::validation(format!("Invalid pane count: {panes}"))
            .with_hint("Use a pane value between 2 and 6."));
    }
    Ok(())
}

/// Build the ordered tmux command sequence for one session: new-session in
/// the first pane's path, mouse wiring, one split per remaining pane,
/// layout selection, a client-resized hook, and initial pane focus.
pub fn build_layout_commands(
    session_name: &str,
    layout: Layout,
    pane_paths: &[String],
) -> Result<Vec<Vec<String>>> {
    validate_pane_count(pane_paths.len())?;

    let sv = |s: &str| s.to_string();
    let window = format!("{session_name}:0");
    let mut commands: Vec<Vec<String>> = vec![
        vec![
            sv("tmux"),
            sv("new-session"),
            sv("-d"),
            sv("-s"),
            sv(session_name),
            sv("-c"),
            pane_paths[0].clone(),
        ],
        vec![
            sv("tmux"),
            sv("set-option"),
            sv("-t"),
            sv(session_name),
            sv("mouse"),
            sv("on"),
        ],
        vec![
            sv("tmux"),
            sv("bind-key"),
            sv("-n"),
            sv("WheelUpPane"),
            sv("send-keys"),
            sv("-M"),
        ],
        vec![
            sv("tmux"),
            sv("bind-key"),
            sv("-n"),
            sv("WheelDownPane"),
            sv("send-keys"),
            sv("-M"),
        ],
    ];

    for (index, path) in pane_paths.iter().enumerate().skip(1) {
        commands.push(vec![
            sv("tmux"),
            sv("split-window"),
            sv(layout.split_flag(index)),
            sv("-t"),
            window.clone(),
            sv("-c"),
            path.clone(),
        ]);
    }

    commands.push(vec![
        sv("tmux"),
        sv("select-layout"),
        sv("-t"),
        window.clone(),
        sv(layout.tmux_layout()),
    ]);
    commands.push(vec![
        sv("tmux"),
        sv("set-hook"),
        sv("-t"),
        sv(session_name),
        sv("client-resized"),
        format!("select-layout -t {window} {}", layout.tmux_layout()),
    ]);
    commands.push(vec![
        sv("tmux"),
        sv("select-pane"),
        sv("-t"),
        format!("{window}.0"),
    ]);
    Ok(commands)
}
