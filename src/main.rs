//! glasswm - compositing X11 window manager
//!
//! Redirects every top-level window offscreen and draws them itself onto
//! the composite overlay with wgpu: rounded corners, soft shadows, and
//! animated opacity and geometry.
//!
//! ```text
//! Super+F1         quit
//! Super+Q          close the focused window
//! Super+K          destroy the focused window
//! Super+F          maximize to the monitor under the window
//! Super+Alt+F      maximize across all monitors
//! Super+V          toggle vsync
//! Super+drag       move (left button) or resize (right button)
//! ```

mod animator;
mod backing;
mod clients;
mod compositor;
mod config;
mod frame;
mod geometry;
mod gpu;
mod registry;
mod renderer;
mod server;
mod shape;
mod stacking;
mod wm;
mod x11;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::compositor::{Compositor, GRABBED_KEYS};
use crate::config::{parse_colour, Config, DEFAULT_BACKGROUND};
use crate::renderer::WgpuRenderer;
use crate::server::WindowServer;
use crate::wm::WindowManager;
use crate::x11::X11Server;

#[derive(Parser)]
#[command(name = "glasswm")]
#[command(about = "Compositing X11 window manager")]
#[command(version)]
struct Cli {
    /// X display to manage (defaults to $DISPLAY)
    #[arg(short, long)]
    display: Option<String>,

    /// Present without waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    /// Run alongside another window manager instead of taking over
    #[arg(long)]
    coexist: bool,

    /// Background colour as RRGGBB
    #[arg(long, default_value = DEFAULT_BACKGROUND, value_parser = parse_colour)]
    background: [f32; 3],
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            display: cli.display,
            vsync: !cli.no_vsync,
            coexist: cli.coexist,
            background: cli.background,
        }
    }
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        .add_directive("wgpu_core=warn".parse()?)
        .add_directive("wgpu_hal=warn".parse()?)
        .add_directive("naga=warn".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from(Cli::parse());

    let server = X11Server::connect(config.display.as_deref(), config.coexist, GRABBED_KEYS)?;
    let (width, height) = server.screen_size();
    info!("managing {width}x{height} screen {}", server.screen_num());

    // SAFETY: the connection and output window belong to `server`, which
    // the window manager keeps alive until after the compositor is dropped
    let gpu = unsafe {
        WgpuRenderer::new(
            server.raw_connection(),
            server.screen_num(),
            server.output_window(),
            (width, height),
            config.vsync,
        )?
    };

    // declared first so it is dropped after the renderer
    let mut wm = WindowManager::new(server, config.coexist);
    let mut compositor = Compositor::new(gpu, wm.mapper(), &config)?;

    frame::run(&mut wm, &mut compositor)?;
    info!("shutting down");
    Ok(())
}
