// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `snapsync signal` command - Act as the controller of a signal file.

use snapsync_core::config::parse_flag_byte;
use snapsync_core::MmapController;

use crate::SignalAction;

pub fn execute(action: SignalAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SignalAction::Arm { path, armed } => {
            let armed = parse_flag_byte("armed", &armed)?;
            MmapController::create(&path, armed)?;
            println!("✓ {} armed ({:?})", path.display(), armed as char);
        }
        SignalAction::Release { path, armed, byte } => {
            let armed = parse_flag_byte("armed", &armed)?;
            let byte = parse_flag_byte("byte", &byte)?;
            MmapController::open(&path, armed)?.release(byte)?;
            println!("✓ {} released ({:?})", path.display(), byte as char);
        }
        SignalAction::Show { path } => {
            // The armed byte is irrelevant for reading.
            let controller = MmapController::open(&path, 0)?;
            match controller.current()? {
                Some(byte) => println!("{}: {:?}", path.display(), byte as char),
                None => println!("{}: empty (reads as released)", path.display()),
            }
        }
    }
    Ok(())
}
