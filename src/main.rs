use drip::classpath::ClassPath;
use drip::jit::JitBackendKind;
use drip::{RuntimeError, Vm, VmConfig};

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

fn cli() -> Command {
    Command::new("drip")
        .version(clap::crate_version!())
        .about("Runs the main method of a compiled Java class")
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .visible_alias("cp")
                .value_name("PATHS")
                .help("Directories to load classes from, separated by ':' or ';'")
                .default_value("."),
        )
        .arg(
            Arg::new("jit")
                .long("jit")
                .action(ArgAction::SetTrue)
                .help("Compile hot methods to native code"),
        )
        .arg(
            Arg::new("jit threshold")
                .long("jit-threshold")
                .value_name("CALLS")
                .value_parser(value_parser!(usize))
                .default_value("2")
                .help("Calls of a method before it is compiled"),
        )
        .arg(
            Arg::new("jit backend")
                .long("jit-backend")
                .value_name("BACKEND")
                .value_parser(["native", "reference"])
                .default_value("native"),
        )
        .arg(
            Arg::new("dump ir")
                .long("dump-ir")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Write the serialized IR of compiled methods to FILE"),
        )
        .arg(
            Arg::new("MAIN_CLASS")
                .help("Class whose main method is run, e.g. com.example.Main")
                .required(true)
                .index(1),
        )
}

fn main() -> Result<(), RuntimeError> {
    env_logger::init();

    let matches = cli().get_matches();
    let classpath = matches
        .get_one::<String>("classpath")
        .map(|cp| ClassPath::parse(cp).roots().to_vec())
        .unwrap_or_default();
    let jit_backend = matches
        .get_one::<String>("jit backend")
        .and_then(|b| b.parse::<JitBackendKind>().ok())
        .unwrap_or_default();
    let config = VmConfig {
        classpath,
        jit: matches.get_flag("jit"),
        jit_threshold: matches.get_one::<usize>("jit threshold").copied().unwrap_or(2),
        jit_backend,
        dump_ir: matches.get_one::<PathBuf>("dump ir").cloned(),
    };

    // Required by `cli`, an empty name fails as `ClassNotFound`.
    let main_class = matches
        .get_one::<String>("MAIN_CLASS")
        .map_or("", String::as_str);
    log::info!("Running '{}' from {:?}", main_class, config.classpath);
    let mut vm = Vm::new(&config);
    vm.run_main(main_class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_class_is_required() {
        assert!(cli().try_get_matches_from(["drip", "--jit"]).is_err());
        let matches = cli()
            .try_get_matches_from(["drip", "--cp", "a:b", "com.example.Main"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("MAIN_CLASS").map(String::as_str),
            Some("com.example.Main")
        );
        assert_eq!(
            matches.get_one::<String>("classpath").map(String::as_str),
            Some("a:b")
        );
    }
}
