use std::io::Write;

use pkcs11_inspect_logger::{debug, info, warn};

use crate::{
    HResult, InspectConfig, Pkcs11Driver, Report,
    provider::{Provider, SlotDescriptor},
};

/// List the private keys of every initialized token of `provider`.
///
/// The provider is initialized here and is finalized, then dropped, before
/// this function returns, on success as on error. The first error aborts the
/// run: the blocks already written to `out` stay there.
pub fn inspect_tokens<P, W>(provider: P, config: &InspectConfig, out: W) -> HResult<()>
where
    P: Provider,
    W: Write,
{
    let driver = Pkcs11Driver::initialize(provider, config.module_path.display().to_string())?;
    match driver.module_info() {
        Ok(module) => info!(
            "{} {}.{} by {} (Cryptoki {}.{})",
            module.description,
            module.library_version.0,
            module.library_version.1,
            module.manufacturer,
            module.cryptoki_version.0,
            module.cryptoki_version.1
        ),
        Err(e) => warn!("{e}"),
    }

    let mut report = Report::new(out);
    for slot_id in driver.token_slots()? {
        let slot = driver.describe_slot(slot_id)?;
        if !slot.token_initialized() {
            debug!("Skipping slot {slot_id}: the token is not initialized");
            continue;
        }
        report.slot(&slot)?;
        list_private_keys(&driver, &slot, config.user_pin.as_bytes(), &mut report)?;
    }
    Ok(())
}

fn list_private_keys<P, W>(
    driver: &Pkcs11Driver<P>,
    slot: &SlotDescriptor,
    pin: &[u8],
    report: &mut Report<W>,
) -> HResult<()>
where
    P: Provider,
    W: Write,
{
    let session = driver.open_authenticated_session(slot.slot_id, pin)?;
    let mut search = session.find_private_keys()?;
    report.private_keys()?;
    let mut count = 0_usize;
    for key in search.by_ref() {
        let attributes = session.get_attributes(key?)?;
        report.private_key(&attributes)?;
        count += 1;
    }
    search.finish()?;
    debug!(
        "Found {count} private keys on slot {} ({})",
        session.slot_id(),
        slot.token.label
    );
    Ok(())
}
