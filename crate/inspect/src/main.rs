use std::{io, process};

use pkcs11_inspect::{HResult, HsmLib, InspectConfig, inspect_tokens};
use pkcs11_inspect_logger::{debug, log_init};

fn main() {
    log_init("info");
    if let Err(err) = main_() {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}

fn main_() -> HResult<()> {
    let config = InspectConfig::from_env();
    debug!("{config:?}");
    let provider = HsmLib::load(&config.module_path)?;
    debug!("Loaded the PKCS#11 module {}", provider.path());
    inspect_tokens(provider, &config, io::stdout().lock())
}
