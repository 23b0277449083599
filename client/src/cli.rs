use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "dashlink", version, about = "Control a Wi-Fi dashcam from the command line")]
pub struct Cli {
    /// KEY=VALUE configuration file (default: /etc/dashlink/dashlink.conf if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stay connected and print state changes until Ctrl-C.
    Watch,
    /// Print the recording and SD-card status.
    Status,
    /// Print the RTSP URL of the live preview.
    StreamUrl,
    /// List recordings on the card.
    Files,
    /// Print SD card capacity.
    Storage,
    /// Toggle recording, checking the camera's state first.
    Record,
    /// Take a photo.
    Photo,
    /// Delete a recording by file name or download URL.
    Delete { name: String },
    /// Erase the SD card.
    Format {
        /// Confirm that everything on the card may be erased.
        #[arg(long)]
        yes: bool,
    },
    /// Switch audio recording on or off.
    Audio {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Change the camera's access-point name and password.
    Wifi { ssid: String, password: String },
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        self == Switch::On
    }
}
