// SPDX-License-Identifier: GPL-2.0

//! Procfs entry that hands out a block of ASCII art.
//!
//! Reading `/proc/piyadonthedripper` returns the art, one line at a time. Anything written to it
//! is logged and then thrown away.

use kernel::io_buffer::{IoBufferReader, IoBufferWriter};
use kernel::prelude::*;
use kernel::proc_fs::{self, Text, WriteBuffer};
use kernel::sync::{Arc, ArcBorrow};
use kernel::{c_str, file};

mod art;

module! {
    type: RustDrip,
    name: "rust_drip",
    author: "Notmycode Foundation",
    description: "Piyadon Dripper",
    license: "GPL",
}

const PROC_NAME: &CStr = c_str!("piyadonthedripper");
const PROC_MODE: u16 = proc_fs::mode::READ_WRITE_ALL;

/// Maximum size of the rendered art, in bytes.
const RENDER_CAPACITY: usize = 65536;

/// Size of the write buffer, including the NUL terminator.
const SCRATCH_SIZE: usize = 128;

struct RustDrip {
    entry: Option<Pin<Box<proc_fs::Registration<Self>>>>,
}

#[vtable]
impl proc_fs::Operations for RustDrip {
    type OpenData = Arc<Text>;
    type Data = Arc<Text>;

    fn open(context: &Arc<Text>, _file: &file::File) -> Result<Self::Data> {
        Ok(context.clone())
    }

    fn read(
        data: ArcBorrow<'_, Text>,
        _file: &file::File,
        writer: &mut impl IoBufferWriter,
        offset: u64,
    ) -> Result<usize> {
        data.read_into(writer, offset).map_err(|e| {
            pr_err!("Failed to copy data to user\n");
            e
        })
    }

    fn write(
        _data: ArcBorrow<'_, Text>,
        _file: &file::File,
        reader: &mut impl IoBufferReader,
        _offset: u64,
    ) -> Result<usize> {
        let len = reader.len();
        let max = WriteBuffer::<SCRATCH_SIZE>::CAPACITY;
        if len > max {
            pr_warn!("Input too long ({} bytes), truncating to {}\n", len, max);
        }

        let mut buf = WriteBuffer::<SCRATCH_SIZE>::new();
        let count = buf.fill(reader).map_err(|e| {
            pr_err!("Failed to copy data from user\n");
            e
        })?;
        pr_info!("Proc file written: {}\n", buf.as_c_str()?);
        Ok(count)
    }
}

impl kernel::Module for RustDrip {
    fn init(_name: &'static CStr, _module: &'static ThisModule) -> Result<Self> {
        let text = Text::try_from_lines(art::ART, RENDER_CAPACITY)?;
        if text.is_truncated() {
            pr_warn!("Render buffer full, truncating art at {} bytes\n", text.len());
        }
        let text = Arc::try_new(text)?;

        let entry = match proc_fs::Registration::new_pinned(PROC_NAME, PROC_MODE, text) {
            Ok(e) => e,
            Err(e) => {
                pr_err!("Failed to create /proc/{}\n", PROC_NAME);
                return Err(e);
            }
        };

        pr_info!("/proc/{} created\n", PROC_NAME);
        Ok(RustDrip { entry: Some(entry) })
    }
}

impl Drop for RustDrip {
    fn drop(&mut self) {
        drop(self.entry.take());
        pr_info!("/proc/{} removed\n", PROC_NAME);
    }
}
