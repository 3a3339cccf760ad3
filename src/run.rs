use anyhow::{Context, Result};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cli::{RadioOpts, RunOpts};
use crate::fleet::Fleet;
use crate::link::Link;
use crate::port::open_port;
use crate::radio::bridge::SerialBridge;
use crate::vision::LineVision;

/// Opens the radio bridge and brings the link up on the broadcast pipe.
pub fn open_link(opts: &RadioOpts) -> Result<Link> {
    let port = open_port(&opts.radio_dev, opts.radio_baud)
        .with_context(|| format!("opening radio bridge on {}", opts.radio_dev))?;
    let bridge = SerialBridge::new(port);
    Link::open(Box::new(bridge), opts.allocator()?, &opts.settings())
        .with_context(|| format!("initialising radio on {}", opts.radio_dev))
}

pub fn run(opts: RunOpts) -> Result<()> {
    info!(?opts, "run");
    let link = open_link(&opts.radio)?;
    let feed = open_port(&opts.vision.vision_dev, opts.vision.vision_baud)
        .with_context(|| format!("opening pose feed on {}", opts.vision.vision_dev))?;
    let mut fleet = Fleet::new(link, Box::new(LineVision::new(feed)), opts.corners.iter().copied());

    let tick = Duration::from_millis(opts.tick_ms);
    let stats_every = Duration::from_secs_f64(opts.stats.max(0.1));
    info!(corners = ?opts.corners, tick_ms = opts.tick_ms, "fleet loop started");

    let mut members: Vec<u8> = Vec::new();
    loop {
        let started = Instant::now();
        if let Err(e) = fleet.update() {
            warn!(error = %e, "fleet tick failed, continuing");
        }
        fleet.link_mut().log_stats(stats_every);

        let now: Vec<u8> = fleet.robots().map(|r| r.id()).collect();
        if now != members {
            info!(robots = ?now, "fleet changed");
            members = now;
        }
        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}
