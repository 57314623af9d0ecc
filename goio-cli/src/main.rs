use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::process;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use goio_lib::command::{AnalogInputChannel, LedColor};
use goio_lib::constants::READ_DDS_TIMEOUT;
use goio_lib::flash::{Calibration, FLASH_RECORD_VERSION, SkipFlashRecord};
use goio_lib::sim::SimulatedGoLink;
use goio_lib::{DeviceConfig, DeviceVariant, GoDevice, GoLink, ProbeType, discover};

/// Command line host for Vernier Go! Link sensor interfaces.
#[derive(Parser, Debug)]
#[command(author, version, about = "Talk to a Vernier Go! Link over USB", long_about = None)]
struct Cli {
    /// Run against an in-process simulated device instead of USB hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Index into the discovered device list
    #[arg(short, long, global = true, default_value_t = 0)]
    device: usize,

    /// Send INIT right after opening the device
    #[arg(long, global = true)]
    init: bool,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached Go! Link devices
    List,
    /// Show firmware status, serial number and sensor id
    Status,
    /// Get or set the measurement period
    Period {
        /// Requested period in seconds; omitted to only read the current one
        seconds: Option<f64>,
    },
    /// Stream measurements to stdout
    Stream {
        /// Measurement period in seconds
        #[arg(short, long, default_value_t = 0.1)]
        period: f64,
        /// Stop after this many samples
        #[arg(short, long)]
        count: Option<usize>,
        /// Stop after this many seconds
        #[arg(short, long, default_value_t = 5.0)]
        seconds: f64,
        /// Probe input range; taken from the attached sensor when omitted
        #[arg(short, long, value_enum)]
        range: Option<Range>,
        /// Skip calibration from the flash record
        #[arg(long)]
        raw: bool,
    },
    /// Identify the attached sensor and print its DDS record
    Sensor {
        /// Refuse records with a bad checksum
        #[arg(long)]
        strict: bool,
    },
    /// Dump non-volatile memory as hex
    NvmRead {
        /// Read sensor (remote) memory instead of the interface's own
        #[arg(long)]
        remote: bool,
        #[arg(short, long, default_value_t = 0)]
        addr: u32,
        #[arg(short, long, default_value_t = 16)]
        len: usize,
    },
    /// Write hex bytes to non-volatile memory
    NvmWrite {
        #[arg(long)]
        remote: bool,
        #[arg(short, long, default_value_t = 0)]
        addr: u32,
        /// Data as a hex string, e.g. 0a0b0c
        data: String,
    },
    /// Read or write the calibration flash record
    Flash {
        #[command(subcommand)]
        action: FlashAction,
    },
    /// Set the status LED
    Led {
        #[arg(value_enum)]
        color: Color,
        #[arg(default_value_t = 4)]
        brightness: u8,
    },
}

#[derive(Subcommand, Debug)]
enum FlashAction {
    /// Print the stored record
    Show,
    /// Store a new record
    Write {
        #[arg(long, default_value_t = 1.0)]
        slope_5v: f32,
        #[arg(long, default_value_t = 0.0)]
        intercept_5v: f32,
        #[arg(long, default_value_t = 1.0)]
        slope_10v: f32,
        #[arg(long, default_value_t = 0.0)]
        intercept_10v: f32,
        #[arg(long, default_value_t = 0)]
        serial: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Range {
    #[value(name = "5v")]
    FiveVolt,
    #[value(name = "10v")]
    TenVolt,
}

impl Range {
    fn probe(self) -> ProbeType {
        match self {
            Range::FiveVolt => ProbeType::Analog5V,
            Range::TenVolt => ProbeType::Analog10V,
        }
    }

    fn channel(self) -> AnalogInputChannel {
        self.probe().input_channel()
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Color {
    Off,
    Red,
    Green,
    Orange,
}

impl From<Color> for LedColor {
    fn from(color: Color) -> Self {
        match color {
            Color::Off => LedColor::Black,
            Color::Red => LedColor::Red,
            Color::Green => LedColor::Green,
            Color::Orange => LedColor::Orange,
        }
    }
}

fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry().with(filter).with(console_layer).init();
}

/// An open device plus, in simulation mode, the handle used to feed it samples.
struct Target {
    device: GoDevice<GoLink>,
    sim: Option<SimulatedGoLink>,
}

fn open(cli: &Cli) -> Result<Target> {
    let config = DeviceConfig::default().with_init_on_open(cli.init);

    if cli.simulate {
        let sim = SimulatedGoLink::new();
        let transport = sim.transport().context("Failed to claim simulated device")?;
        let device = GoDevice::<GoLink>::with_transport(transport, config)?;
        info!("Opened simulated {}", GoLink::NAME);
        return Ok(Target { device, sim: Some(sim) });
    }

    let locations = discover(GoLink::VENDOR_ID, GoLink::PRODUCT_ID).context("USB enumeration failed")?;
    let location = locations
        .get(cli.device)
        .with_context(|| format!("No {} at index {} ({} found)", GoLink::NAME, cli.device, locations.len()))?;
    let device = GoDevice::<GoLink>::open(location, config)
        .with_context(|| format!("Failed to open {} at {}", GoLink::NAME, location))?;
    info!(%location, "Opened {}", GoLink::NAME);
    Ok(Target { device, sim: None })
}

fn list(simulate: bool) -> Result<()> {
    if simulate {
        println!("sim  {:04x}:{:04x}  {} (simulated)", GoLink::VENDOR_ID, GoLink::PRODUCT_ID, GoLink::NAME);
        return Ok(());
    }
    let locations = discover(GoLink::VENDOR_ID, GoLink::PRODUCT_ID)?;
    if locations.is_empty() {
        println!("No {} devices found", GoLink::NAME);
    }
    for (index, location) in locations.iter().enumerate() {
        println!(
            "{}  {}  {:04x}:{:04x}  {}",
            index,
            location,
            location.vendor_id,
            location.product_id,
            location.product.as_deref().unwrap_or(GoLink::NAME)
        );
    }
    Ok(())
}

fn status(device: &mut GoDevice<GoLink>) -> Result<()> {
    let status = device.get_status()?;
    println!("Status:          {:#04x}", status.status);
    println!("Master firmware: {}.{}", status.master_version.0, status.master_version.1);
    println!("Slave firmware:  {}.{}", status.slave_version.0, status.slave_version.1);
    println!("Serial number:   {}", device.get_serial_number()?);
    println!("Sensor id:       {}", device.get_sensor_id()?);
    println!("Input channel:   {:?}", device.get_analog_input_channel()?);
    let (color, brightness) = device.get_led_state()?;
    println!("LED:             {:?} ({})", color, brightness);
    Ok(())
}

fn period(device: &mut GoDevice<GoLink>, seconds: Option<f64>) -> Result<()> {
    if let Some(requested) = seconds {
        let legal = device.calculate_nearest_legal_measurement_period(requested);
        if (legal - requested).abs() > f64::EPSILON {
            warn!(requested, legal, "Period adjusted to the nearest legal value");
        }
        device.set_measurement_period(requested, Duration::from_secs(1))?;
    }
    let current = device.get_measurement_period(Duration::from_secs(1))?;
    println!("{:.6} s", current);
    Ok(())
}

/// Feeds a slow ramp into the simulated device until the sample budget runs out.
fn spawn_sim_feeder(sim: SimulatedGoLink, period: f64, total: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let step = Duration::from_secs_f64(period.max(0.001));
        for i in 0..total {
            let sample = ((i * 37) % 4096) as i16;
            sim.push_measurements(&[sample]);
            thread::sleep(step);
        }
    })
}

fn stream(
    target: &mut Target,
    period: f64,
    count: Option<usize>,
    seconds: f64,
    range: Option<Range>,
    raw: bool,
) -> Result<()> {
    let device = &mut target.device;
    let probe = match range {
        Some(range) => {
            device.set_analog_input_channel(range.channel())?;
            range.probe()
        }
        None => {
            device.open_sensor(false, READ_DDS_TIMEOUT)?;
            device.get_probe_type()
        }
    };
    info!(%probe, "Input range selected");
    device.set_measurement_period(period, Duration::from_secs(1))?;
    let actual = device.get_measurement_period(Duration::from_secs(1))?;
    info!(period = actual, "Measurement period set");

    if !raw && device.read_flash_record(Duration::from_secs(2)).is_err() {
        warn!("No valid flash record, using nominal scaling");
    }

    let feeder = target.sim.clone().map(|sim| {
        let total = count.unwrap_or_else(|| (seconds / actual).ceil() as usize);
        spawn_sim_feeder(sim, actual, total)
    });

    device.start_measurements()?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    let mut seen = 0usize;
    let limit = count.unwrap_or(usize::MAX);

    while seen < limit && Instant::now() < deadline {
        let samples = device.read_raw_measurements(Some(limit - seen))?;
        if samples.is_empty() {
            thread::sleep(Duration::from_millis(10));
            continue;
        }
        for raw_value in samples {
            let volts = device.convert_to_voltage(raw_value, probe, !raw);
            println!("{:>8} {:>6} {:>9.4} V", seen, raw_value, volts);
            seen += 1;
        }
    }

    device.stop_measurements()?;
    let stats = device.session().stats();
    info!(samples = seen, ?stats, "Streaming finished");

    if let Some(handle) = feeder {
        if handle.join().is_err() {
            warn!("Simulated feeder thread panicked");
        }
    }
    Ok(())
}

fn sensor(device: &mut GoDevice<GoLink>, strict: bool) -> Result<()> {
    let record = device.open_sensor(strict, READ_DDS_TIMEOUT)?;
    println!("Sensor number: {}", record.sensor_number);
    println!("Probe type:    {}", device.get_probe_type());
    if record.sensor_number == 0 {
        println!("No sensor attached");
        return Ok(());
    }
    println!("Long name:     {}", record.long_name);
    println!("Short name:    {}", record.short_name);
    println!("Serial number: {}", record.serial_number);
    println!("Lot code:      {:02x}/{:02x}", record.lot_code.0, record.lot_code.1);
    println!("Typ period:    {:.4} s", record.typ_sample_period);
    println!("Range:         {} .. {}", record.y_min_value, record.y_max_value);
    let page = record.active_page();
    println!(
        "Calibration:   page {} eq {} a={} b={} c={} {}",
        record.active_cal_page,
        record.calibration_equation,
        page.coefficient_a,
        page.coefficient_b,
        page.coefficient_c,
        page.units
    );
    Ok(())
}

fn nvm_read(device: &mut GoDevice<GoLink>, remote: bool, addr: u32, len: usize) -> Result<()> {
    let data = device.read_non_volatile_memory(!remote, addr, len, Duration::from_secs(2), None)?;
    for (row, chunk) in data.chunks(16).enumerate() {
        println!("{:04x}: {}", addr as usize + row * 16, hex::encode(chunk));
    }
    Ok(())
}

fn nvm_write(device: &mut GoDevice<GoLink>, remote: bool, addr: u32, data: &str) -> Result<()> {
    let bytes = hex::decode(data.trim()).context("Data must be a hex string")?;
    if bytes.is_empty() {
        bail!("Nothing to write");
    }
    device.write_non_volatile_memory(!remote, addr, &bytes, Duration::from_secs(4), None)?;
    println!("Wrote {} bytes at {:#04x}", bytes.len(), addr);
    Ok(())
}

fn flash(device: &mut GoDevice<GoLink>, action: FlashAction) -> Result<()> {
    match action {
        FlashAction::Show => {
            let record = device.read_flash_record(Duration::from_secs(2))?;
            println!("Version:       {}", record.version);
            println!(
                "5V  slope/int: {:.6} / {:.6}",
                record.calibration_5v.slope, record.calibration_5v.intercept
            );
            println!(
                "10V slope/int: {:.6} / {:.6}",
                record.calibration_10v.slope, record.calibration_10v.intercept
            );
            println!("Serial number: {}", record.serial_number);
        }
        FlashAction::Write {
            slope_5v,
            intercept_5v,
            slope_10v,
            intercept_10v,
            serial,
        } => {
            let record = SkipFlashRecord {
                version: FLASH_RECORD_VERSION,
                calibration_5v: Calibration {
                    slope: slope_5v,
                    intercept: intercept_5v,
                },
                calibration_10v: Calibration {
                    slope: slope_10v,
                    intercept: intercept_10v,
                },
                serial_number: serial,
            };
            device.write_flash_record(&record, Duration::from_secs(4))?;
            println!("Flash record written");
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    if let Command::List = cli.command {
        return list(cli.simulate);
    }

    let mut target = open(&cli)?;
    let result = match cli.command {
        Command::List => Ok(()),
        Command::Status => status(&mut target.device),
        Command::Period { seconds } => period(&mut target.device, seconds),
        Command::Stream {
            period,
            count,
            seconds,
            range,
            raw,
        } => stream(&mut target, period, count, seconds, range, raw),
        Command::Sensor { strict } => sensor(&mut target.device, strict),
        Command::NvmRead { remote, addr, len } => nvm_read(&mut target.device, remote, addr, len),
        Command::NvmWrite { remote, addr, ref data } => nvm_write(&mut target.device, remote, addr, data),
        Command::Flash { action } => flash(&mut target.device, action),
        Command::Led { color, brightness } => target
            .device
            .set_led_state(color.into(), brightness)
            .map_err(Into::into),
    };

    if result.is_err() {
        let last = target.device.get_last_cmd_response_status();
        warn!(
            last_cmd = last.last_cmd,
            last_status = last.last_cmd_status,
            "Device state at failure"
        );
    }
    target.device.close()?;
    result
}

fn main() {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        process::exit(1);
    }
}
