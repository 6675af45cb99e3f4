extern crate tender_host;

use std::process::exit;

use tender_host::mem::layout::GuestLayout;
use tender_host::modules::net::parse_mac;
use tender_host::modules::{BlockModule, NetModule};
use tender_host::tender_state::tender::EvolvableTender;
use tender_host::{new_error, BootParams, Result, TenderConfiguration, UninitializedTender};
use tender_testing::HELLO_GUEST_X86_64;

const USAGE: &str = "usage: hello [--mem MiB] [--block FILE] [--tap IFNAME] [--mac MAC] \
                     [--report] [IMAGE] [-- CMDLINE...]";
const DEFAULT_MAC: &str = "02:00:00:00:00:01";

// Runs a flat binary unikernel image, loaded at the kernel base, under the
// tender. Without an image the built-in x86_64 hello guest runs.
//
// As no tracing subscriber is set up, trace events emitted by the tender
// show up as log messages; set RUST_LOG=debug to see them.

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("hello: {}", e);
        exit(1);
    }
}

fn run() -> Result<()> {
    let mut config = TenderConfiguration::default();
    let mut block = None;
    let mut tap = None;
    let mut mac = DEFAULT_MAC.to_string();
    let mut image = None;
    let mut cmdline = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = || args.next().ok_or_else(|| new_error!("{}", USAGE));
        match arg.as_str() {
            "--mem" => {
                let mib: usize = value()?
                    .parse()
                    .map_err(|_| new_error!("{}", USAGE))?;
                config.mem_size = mib << 20;
            }
            "--block" => block = Some(value()?),
            "--tap" => tap = Some(value()?),
            "--mac" => mac = value()?,
            "--report" => config.report_disallowed_syscalls = true,
            "--" => {
                cmdline.extend(args.by_ref());
                break;
            }
            _ if arg.starts_with("--") || image.is_some() => {
                return Err(new_error!("{}", USAGE));
            }
            _ => image = Some(arg),
        }
    }

    let image = match image {
        Some(path) => std::fs::read(path)?,
        None => HELLO_GUEST_X86_64.to_vec(),
    };

    let mut tender = UninitializedTender::new(config)?;
    let kernel_end = tender.load_flat_image(&image)?;
    if let Some(path) = block {
        tender.register_module(Box::new(BlockModule::open(path)?));
    }
    if let Some(ifname) = tap {
        tender.register_module(Box::new(NetModule::attach_tap(&ifname, parse_mac(&mac)?)?));
    }

    let ready = tender.evolve(BootParams::new(
        GuestLayout::kernel_offset(),
        kernel_end,
        cmdline.join(" "),
    ))?;
    match ready.run()? {}
}
