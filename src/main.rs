extern crate b2rio;
extern crate getopts;

use std::env;
use std::process::exit;

use anyhow::Context;
use b2rio::{config, Error, Params};
use getopts::Options;
use log::{error, warn};

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} --brain_path FILE --output_file NAME [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    /*
     Beginning of parsing command line arguments/options
    */
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();
    let opts = config::options();

    let matches = match opts.parse(&args[1..]) {
        Err(f) => {
            error!("{}", f);
            print_usage(&program, &opts);
            exit(1);
        }
        Ok(m) => m,
    };

    //Help requested
    if matches.opt_present("h") {
        print_usage(&program, &opts);
        return;
    }

    if !matches.free.is_empty() {
        warn!("Ignoring unexpected arguments: {:?}", matches.free);
    }

    let params = match Params::from_matches(&matches) {
        Ok(p) => p,
        //Missing or bad arguments: report and leave without producing anything
        Err(e @ Error::Configuration(_)) => {
            println!("{}", e);
            print_usage(&program, &opts);
            return;
        }
        Err(e) => {
            error!("{}", e);
            exit(1);
        }
    };
    /*
    End of parsing command line arguments/options
    */

    let result = b2rio::run(&params)
        .with_context(|| format!("analysis of {} failed", params.brain_path.display()));
    if let Err(e) = result {
        error!("ERROR! : {:#}", e);
        exit(1);
    }
}
