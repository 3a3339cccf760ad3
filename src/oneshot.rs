// Single-robot subcommands: send a command, run a calibration, edit config.

use anyhow::{Context, Result, bail};
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::cli::{ConfigOpts, RobotAction, RobotOpts, ScenarioOpts};
use crate::config::ConfigSync;
use crate::link::Link;
use crate::port::open_port;
use crate::proto::factory::{action, configuration, general};
use crate::robot::Robot;
use crate::run::open_link;
use crate::scenario::{Scenario, ScenarioKind};
use crate::vision::{LineVision, Vision};

const TICK: Duration = Duration::from_millis(5);
/// Longest a single motion may run before we stop waiting for it.
const MOTION_LIMIT: Duration = Duration::from_secs(60);
/// Longest a full calibration may run.
const SCENARIO_LIMIT: Duration = Duration::from_secs(600);

/// Polls the link until `done` or `limit` passes.
fn pump(link: &mut Link, limit: Duration, done: impl Fn(&Link) -> bool) -> Result<bool> {
    let deadline = Instant::now() + limit;
    while !done(link) {
        if Instant::now() >= deadline {
            return Ok(false);
        }
        link.poll().context("polling radio")?;
        thread::sleep(TICK);
    }
    Ok(true)
}

fn print_log(robot: &Robot) {
    for entry in robot.take_log() {
        println!(
            "  [{:?}] mid={} {}: {}",
            entry.kind, entry.message_id, entry.category, entry.text
        );
    }
}

pub fn describe() -> Result<()> {
    use clap::ValueEnum;
    for kind in ScenarioKind::value_variants() {
        println!("{}\n", kind.description());
    }
    Ok(())
}

pub fn robot(opts: RobotOpts) -> Result<()> {
    let mut link = open_link(&opts.radio)?;
    let robot = Robot::connect(opts.id, &mut link)
        .with_context(|| format!("registering robot {}", opts.id))?;

    info!(robot = opts.id, action = ?opts.action, "sending");
    let mid = match opts.action {
        RobotAction::Move { mm, direction } => {
            robot.move_mm(&mut link, mm, direction.map(Into::into))?
        }
        RobotAction::Rotate { degrees, ccw } => {
            robot.rotate(&mut link, degrees, RobotAction::rotate_direction(ccw))?
        }
        RobotAction::Speed { speed } => {
            robot.send_command(&mut link, action::set_speed(speed), None, None, true)?
        }
        RobotAction::Cancel => {
            robot.send_command(&mut link, action::cancel_movement(), None, None, true)?
        }
        RobotAction::Reboot => {
            robot.send_command(&mut link, general::reboot(), None, None, true)?
        }
    };

    // The exchange is over once the link drops the request.
    if !pump(&mut link, MOTION_LIMIT, |l| !l.is_pending(mid))? {
        warn!(robot = opts.id, "gave up waiting for the robot to finish");
    }
    println!("robot {} state: {:?}", robot.id(), robot.state());
    print_log(&robot);
    Ok(())
}

pub fn scenario(opts: ScenarioOpts) -> Result<()> {
    let mut link = open_link(&opts.radio)?;
    let feed = open_port(&opts.vision.vision_dev, opts.vision.vision_baud)
        .with_context(|| format!("opening pose feed on {}", opts.vision.vision_dev))?;
    let mut vision = LineVision::new(feed);

    let mut robot = Robot::connect(opts.robot, &mut link)
        .with_context(|| format!("registering robot {}", opts.robot))?;
    robot.attach_vision(&mut vision);

    let finished = Rc::new(Cell::new(false));
    let flag = finished.clone();
    let scenario = Scenario::new(
        robot.clone(),
        opts.kind.build(),
        Box::new(move |_, _| flag.set(true)),
    );
    println!("{}\n", scenario.description());
    scenario.run(&mut link);

    let deadline = Instant::now() + SCENARIO_LIMIT;
    let mut last_percent = -1.0;
    while !finished.get() {
        if Instant::now() >= deadline {
            bail!("scenario did not finish within {:?}", SCENARIO_LIMIT);
        }
        vision.process_cycle().context("reading pose feed")?;
        link.poll().context("polling radio")?;
        let percent = scenario.percent_complete();
        if percent != last_percent {
            info!(percent, "scenario progress");
            last_percent = percent;
        }
        thread::sleep(TICK);
    }
    robot.detach_vision(&mut vision);

    if !scenario.is_success() {
        print_log(&robot);
        bail!(
            "scenario {} failed on robot {}",
            scenario.description().name,
            scenario.robot_id()
        );
    }
    match scenario.result() {
        Some(result) => println!("{result}"),
        None => println!("(no result)"),
    }
    Ok(())
}

pub fn config(opts: ConfigOpts) -> Result<()> {
    let mut link = open_link(&opts.radio)?;
    let robot = Robot::connect(opts.robot, &mut link)
        .with_context(|| format!("registering robot {}", opts.robot))?;

    let limit = Duration::from_secs(120);
    if opts.reload {
        let mid = robot.send_command(&mut link, configuration::load(), None, None, true)?;
        pump(&mut link, limit, |l| !l.is_pending(mid))?;
    }

    let sync = ConfigSync::new(robot.clone());
    sync.start(&mut link);
    let watched = sync.clone();
    pump(&mut link, limit, move |_| watched.is_done())?;
    if !sync.is_synced() {
        bail!("could not read configuration of robot {}", opts.robot);
    }
    for value in sync.values() {
        println!("{value}");
    }

    if let Some((id, text)) = &opts.set {
        let mid = sync.set(&mut link, *id, text)?;
        pump(&mut link, limit, |l| !l.is_pending(mid))?;
        match sync.get(*id) {
            Some(v) => println!("now: {v}"),
            None => warn!(id, "value vanished from table"),
        }
    }

    if opts.dump {
        let mid = robot.send_command(&mut link, configuration::print_all(), None, None, true)?;
        pump(&mut link, limit, |l| !l.is_pending(mid))?;
    }

    if opts.store {
        sync.store_and_reboot(&mut link)?;
        pump(&mut link, limit, |l| l.pending_count() == 0)?;
        println!("stored; robot state: {:?}", robot.state());
    }
    print_log(&robot);
    Ok(())
}
