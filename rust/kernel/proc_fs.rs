// SPDX-License-Identifier: GPL-2.0

//! Process information pseudo-file system (procfs) entries.
//!
//! This module allows Rust code to expose files under `/proc` whose contents are produced by
//! code rather than stored anywhere.
//!
//! C header: [`include/linux/proc_fs.h`](../../../../include/linux/proc_fs.h)

use crate::{
    bindings, c_types,
    error::{code::*, from_kernel_result},
    file::File,
    io_buffer::{IoBufferReader, IoBufferWriter},
    str::CStr,
    types::PointerWrapper,
    user_ptr::UserSlicePtr,
    Result,
};
use alloc::{boxed::Box, vec::Vec};
use core::{
    marker::{PhantomData, PhantomPinned},
    mem::MaybeUninit,
    pin::Pin,
};
use macros::vtable;

/// Commonly used access modes for procfs entries.
pub mod mode {
    /// Readable by everyone.
    pub const READ_ALL: u16 = 0o444;

    /// Readable and writable by everyone.
    pub const READ_WRITE_ALL: u16 = 0o666;
}

/// Operations implemented by a procfs entry.
///
/// # Examples
///
/// A read-only entry that serves a fixed string from its open context:
///
/// ```
/// # use kernel::prelude::*;
/// # use kernel::io_buffer::IoBufferWriter;
/// # use kernel::{c_str, file::File, proc_fs};
/// struct Motd;
///
/// #[vtable]
/// impl proc_fs::Operations for Motd {
///     type OpenData = &'static [u8];
///     type Data = Box<&'static [u8]>;
///
///     fn open(context: &&'static [u8], _file: &File) -> Result<Self::Data> {
///         Ok(Box::try_new(*context)?)
///     }
///
///     fn read(
///         data: &&'static [u8],
///         _file: &File,
///         writer: &mut impl IoBufferWriter,
///         offset: u64,
///     ) -> Result<usize> {
///         let offset = match usize::try_from(offset) {
///             Ok(o) if o < data.len() => o,
///             _ => return Ok(0),
///         };
///         let len = core::cmp::min(writer.len(), data.len() - offset);
///         writer.write_slice(&data[offset..][..len])?;
///         Ok(len)
///     }
/// }
///
/// fn create() -> Result<Pin<Box<proc_fs::Registration<Motd>>>> {
///     proc_fs::Registration::new_pinned(c_str!("motd"), proc_fs::mode::READ_ALL, b"hi\n")
/// }
///
/// // `/proc/motd` exists until the registration is dropped.
/// let entry = create().unwrap();
/// drop(entry);
/// ```
#[vtable]
pub trait Operations {
    /// The type of the context data stored in the registration and made available to
    /// [`Operations::open`].
    type OpenData: Sync = ();

    /// The type of the per-open data, stored in the file until it is released.
    type Data: PointerWrapper + Send + Sync = ();

    /// Creates the per-open data for a new file.
    fn open(context: &Self::OpenData, file: &File) -> Result<Self::Data>;

    /// Cleans up after the last reference to the file goes away.
    ///
    /// The default implementation just drops `data`.
    fn release(_data: Self::Data, _file: &File) {}

    /// Reads data from the entry into `writer`, starting at `offset`.
    ///
    /// Returns the number of bytes written; zero signals the end of the stream. The file position
    /// is advanced by the returned amount.
    fn read(
        _data: <Self::Data as PointerWrapper>::Borrowed<'_>,
        _file: &File,
        _writer: &mut impl IoBufferWriter,
        _offset: u64,
    ) -> Result<usize> {
        Err(EINVAL)
    }

    /// Writes data from `reader` into the entry.
    ///
    /// Returns the number of bytes consumed.
    fn write(
        _data: <Self::Data as PointerWrapper>::Borrowed<'_>,
        _file: &File,
        _reader: &mut impl IoBufferReader,
        _offset: u64,
    ) -> Result<usize> {
        Err(EINVAL)
    }
}

/// A registration of a procfs entry.
///
/// The entry is removed from `/proc` when the registration is dropped.
pub struct Registration<T: Operations> {
    // A non-null entry means the registration is active.
    entry: *mut bindings::proc_dir_entry,
    open_data: MaybeUninit<T::OpenData>,
    _p: PhantomData<T>,
    _pin: PhantomPinned,
}

// SAFETY: `Registration` does not expose any of its state across threads, other than
// `open_data`, which is required to be `Sync` and is only ever shared.
unsafe impl<T: Operations> Sync for Registration<T> {}

// SAFETY: Both `proc_create_data` and `proc_remove` may be called from any thread, so
// `Registration` is `Send` as long as the open data is.
unsafe impl<T: Operations> Send for Registration<T> where T::OpenData: Send {}

impl<T: Operations> Registration<T> {
    /// Creates a new [`Registration`] but does not register it yet.
    ///
    /// It is allowed to move.
    pub fn new() -> Self {
        Self {
            entry: core::ptr::null_mut(),
            open_data: MaybeUninit::uninit(),
            _p: PhantomData,
            _pin: PhantomPinned,
        }
    }

    /// Creates a new procfs entry registration and registers it.
    ///
    /// Returns a pinned heap-allocated representation of the registration.
    pub fn new_pinned(name: &CStr, mode: u16, open_data: T::OpenData) -> Result<Pin<Box<Self>>> {
        let mut r = Pin::from(Box::try_new(Self::new())?);
        r.as_mut().register(name, mode, open_data)?;
        Ok(r)
    }

    /// Registers the entry directly under `/proc`.
    ///
    /// It must be pinned because the C portion of the kernel keeps a pointer to `open_data` for as
    /// long as the entry exists.
    pub fn register(
        self: Pin<&mut Self>,
        name: &CStr,
        mode: u16,
        open_data: T::OpenData,
    ) -> Result {
        // SAFETY: We must ensure that we never move out of `this`.
        let this = unsafe { self.get_unchecked_mut() };
        if !this.entry.is_null() {
            // Already registered.
            return Err(EINVAL);
        }

        this.open_data.write(open_data);

        // SAFETY: `name` is a valid C string (procfs copies it), `PROC_OPS` is static, and
        // `open_data` lives in pinned memory that outlives the entry (the entry is removed in
        // `drop` before `open_data` is).
        let entry = unsafe {
            bindings::proc_create_data(
                name.as_char_ptr(),
                mode,
                core::ptr::null_mut(),
                &ProcOpsVtable::<T>::PROC_OPS,
                this.open_data.as_ptr() as *mut c_types::c_void,
            )
        };
        if entry.is_null() {
            // SAFETY: `open_data` was initialised above and procfs never saw it.
            unsafe { this.open_data.assume_init_drop() };
            return Err(ENOMEM);
        }

        this.entry = entry;
        Ok(())
    }
}

impl<T: Operations> Default for Registration<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Operations> Drop for Registration<T> {
    fn drop(&mut self) {
        if !self.entry.is_null() {
            // SAFETY: `entry` was returned by a successful `proc_create_data`. `proc_remove` waits
            // for in-flight callbacks and releases files that are still open, so nothing refers
            // to `open_data` once it returns.
            unsafe { bindings::proc_remove(self.entry) };

            // SAFETY: `open_data` is initialised whenever `entry` is non-null.
            unsafe { self.open_data.assume_init_drop() };
        }
    }
}

/// Validates a file position handed to a procfs callback and converts it to an offset.
///
/// Negative positions are rejected with `EINVAL`.
///
/// # Examples
///
/// ```
/// # use kernel::error::code::EINVAL;
/// # use kernel::proc_fs;
/// assert_eq!(proc_fs::position(0), Ok(0));
/// assert_eq!(proc_fs::position(8), Ok(8));
/// assert_eq!(proc_fs::position(-1), Err(EINVAL));
/// ```
pub fn position(pos: bindings::loff_t) -> Result<u64> {
    u64::try_from(pos).map_err(|_| EINVAL)
}

/// Advances the file position `pos` by the `n` bytes just transferred.
///
/// On error `pos` is left unchanged.
///
/// # Examples
///
/// ```
/// # use kernel::error::code::EINVAL;
/// # use kernel::proc_fs;
/// let mut pos = 0;
/// assert_eq!(proc_fs::advance(&mut pos, 8), Ok(()));
/// assert_eq!(pos, 8);
/// assert_eq!(proc_fs::advance(&mut pos, 0), Ok(()));
/// assert_eq!(pos, 8);
///
/// let mut neg = -1;
/// assert_eq!(proc_fs::advance(&mut neg, 8), Err(EINVAL));
/// assert_eq!(neg, -1);
///
/// let mut end = i64::MAX;
/// assert_eq!(proc_fs::advance(&mut end, 1), Err(EINVAL));
/// assert_eq!(end, i64::MAX);
/// ```
pub fn advance(pos: &mut bindings::loff_t, n: usize) -> Result {
    if *pos < 0 {
        return Err(EINVAL);
    }
    let n = bindings::loff_t::try_from(n).map_err(|_| EINVAL)?;
    *pos = pos.checked_add(n).ok_or(EINVAL)?;
    Ok(())
}

/// Immutable text served by a procfs entry, built from a list of lines.
///
/// Each line is followed by `\n`. The text never grows beyond the capacity it was built with; if
/// the lines don't fit, it stops at exactly that many bytes (possibly in the middle of a line) and
/// is marked as truncated.
///
/// # Examples
///
/// ```
/// # use kernel::proc_fs::Text;
/// let t = Text::try_from_lines(&["AAA", "BBB"], 65536).unwrap();
/// assert_eq!(t.as_bytes(), b"AAA\nBBB\n");
/// assert!(!t.is_truncated());
///
/// // Reads are windows into the text; at or past the end they are empty.
/// assert_eq!(t.window(0, 100), b"AAA\nBBB\n");
/// assert_eq!(t.window(4, 3), b"BBB");
/// assert!(t.window(8, 100).is_empty());
/// assert!(t.window(u64::MAX, 100).is_empty());
///
/// // The last line fits, its terminator doesn't.
/// let t = Text::try_from_lines(&["AAA", "BBB"], 7).unwrap();
/// assert_eq!(t.as_bytes(), b"AAA\nBBB");
/// assert!(t.is_truncated());
///
/// // An exact fit is not a truncation, but a line dropped entirely is.
/// assert!(!Text::try_from_lines(&["AAA", "BBB"], 8).unwrap().is_truncated());
/// let t = Text::try_from_lines(&["AAA", ""], 4).unwrap();
/// assert_eq!(t.as_bytes(), b"AAA\n");
/// assert!(t.is_truncated());
///
/// assert!(Text::try_from_lines(&[], 16).unwrap().is_empty());
/// ```
pub struct Text {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Text {
    /// Joins `lines` into at most `capacity` bytes.
    pub fn try_from_lines(lines: &[&str], capacity: usize) -> Result<Self> {
        let needed = lines
            .iter()
            .fold(0usize, |acc, l| acc.saturating_add(l.len()).saturating_add(1));
        let mut bytes = Vec::try_with_capacity(core::cmp::min(needed, capacity))?;
        let mut truncated = false;

        for line in lines {
            let line = line.as_bytes();
            let room = capacity - bytes.len();
            if line.len() >= room {
                bytes.try_extend_from_slice(&line[..core::cmp::min(line.len(), room)])?;
                truncated = true;
                break;
            }
            bytes.try_extend_from_slice(line)?;
            bytes.try_push(b'\n')?;
        }

        Ok(Self { bytes, truncated })
    }

    /// Returns the whole text.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the length of the text, in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns whether the text is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns whether some of the lines didn't fit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the (at most `count` bytes long) slice that a read at `offset` should return.
    pub fn window(&self, offset: u64, count: usize) -> &[u8] {
        let offset = match usize::try_from(offset) {
            Ok(o) if o < self.len() => o,
            _ => return &[],
        };
        let rest = &self.bytes[offset..];
        &rest[..core::cmp::min(count, rest.len())]
    }

    /// Copies the text starting at `offset` into `writer`, as much as it has room for.
    ///
    /// Returns the number of bytes copied, zero meaning end of stream, or `EFAULT` if `writer`
    /// cannot be written to.
    ///
    /// # Examples
    ///
    /// ```
    /// # use kernel::prelude::*;
    /// # use kernel::io_buffer::IoBufferWriter;
    /// # use kernel::proc_fs::{self, Text};
    /// # struct VecWriter { out: Vec<u8>, cap: usize, fault: bool }
    /// # impl IoBufferWriter for VecWriter {
    /// #     fn len(&self) -> usize { self.cap - self.out.len() }
    /// #     fn clear(&mut self, _len: usize) -> Result { Err(EFAULT) }
    /// #     unsafe fn write_raw(&mut self, data: *const u8, len: usize) -> Result {
    /// #         if self.fault || len > self.len() { return Err(EFAULT); }
    /// #         // SAFETY: The caller guarantees that `data` is valid for `len` bytes.
    /// #         let src = unsafe { core::slice::from_raw_parts(data, len) };
    /// #         self.out.try_extend_from_slice(src)?;
    /// #         Ok(())
    /// #     }
    /// # }
    /// let t = Text::try_from_lines(&["AAA", "BBB"], 65536).unwrap();
    ///
    /// // A first read of 100 bytes gets everything and moves the position to 8...
    /// let mut pos = 0;
    /// let mut w = VecWriter { out: Vec::new(), cap: 100, fault: false };
    /// let n = t.read_into(&mut w, proc_fs::position(pos).unwrap()).unwrap();
    /// proc_fs::advance(&mut pos, n).unwrap();
    /// assert_eq!((n, pos), (8, 8));
    /// assert_eq!(&w.out[..], b"AAA\nBBB\n");
    ///
    /// // ...and the next one reports the end of the stream.
    /// let mut w = VecWriter { out: Vec::new(), cap: 100, fault: false };
    /// assert_eq!(t.read_into(&mut w, proc_fs::position(pos).unwrap()), Ok(0));
    ///
    /// // Small reads at increasing offsets rebuild the text exactly.
    /// let (mut all, mut pos) = (Vec::new(), 0);
    /// loop {
    ///     let mut w = VecWriter { out: Vec::new(), cap: 3, fault: false };
    ///     let n = t.read_into(&mut w, proc_fs::position(pos).unwrap()).unwrap();
    ///     if n == 0 {
    ///         break;
    ///     }
    ///     all.try_extend_from_slice(&w.out).unwrap();
    ///     proc_fs::advance(&mut pos, n).unwrap();
    /// }
    /// assert_eq!(&all[..], t.as_bytes());
    ///
    /// let mut w = VecWriter { out: Vec::new(), cap: 100, fault: true };
    /// assert_eq!(t.read_into(&mut w, 0), Err(EFAULT));
    /// ```
    pub fn read_into(&self, writer: &mut impl IoBufferWriter, offset: u64) -> Result<usize> {
        let chunk = self.window(offset, writer.len());
        if chunk.is_empty() {
            return Ok(0);
        }
        writer.write_slice(chunk).map_err(|_| EFAULT)?;
        Ok(chunk.len())
    }
}

/// A fixed-size buffer holding the NUL-terminated payload of a single write.
///
/// At most `N - 1` bytes are accepted; the rest of the input is left unread.
///
/// # Examples
///
/// ```
/// # use kernel::prelude::*;
/// # use kernel::io_buffer::IoBufferReader;
/// # use kernel::proc_fs::WriteBuffer;
/// # struct SliceReader<'a>(&'a [u8], bool);
/// # impl IoBufferReader for SliceReader<'_> {
/// #     fn len(&self) -> usize { self.0.len() }
/// #     fn skip(&mut self, len: usize) -> Result {
/// #         self.0 = self.0.get(len..).ok_or(EFAULT)?;
/// #         Ok(())
/// #     }
/// #     unsafe fn read_raw(&mut self, out: *mut u8, len: usize) -> Result {
/// #         if self.1 || len > self.0.len() { return Err(EFAULT); }
/// #         // SAFETY: The caller guarantees that `out` is valid for `len` bytes.
/// #         unsafe { core::ptr::copy_nonoverlapping(self.0.as_ptr(), out, len) };
/// #         self.0 = &self.0[len..];
/// #         Ok(())
/// #     }
/// # }
/// assert_eq!(WriteBuffer::<128>::CAPACITY, 127);
///
/// let mut b = WriteBuffer::<128>::new();
/// assert_eq!(b.fill(&mut SliceReader(b"hello", false)), Ok(5));
/// assert_eq!(b.payload(), b"hello");
/// assert_eq!(b.as_c_str().unwrap().as_bytes(), b"hello");
///
/// // Long input is clamped, and what doesn't fit is not consumed.
/// let input = [b'x'; 200];
/// let mut r = SliceReader(&input, false);
/// let mut b = WriteBuffer::<128>::new();
/// assert_eq!(b.fill(&mut r), Ok(127));
/// assert_eq!(b.payload(), &input[..127]);
/// assert_eq!(r.len(), 73);
///
/// // Exactly at the limit, and empty.
/// assert_eq!(WriteBuffer::<128>::new().fill(&mut SliceReader(&input[..127], false)), Ok(127));
/// assert_eq!(WriteBuffer::<128>::new().fill(&mut SliceReader(b"", false)), Ok(0));
///
/// // The C string view stops at the first NUL; the payload doesn't.
/// let mut b = WriteBuffer::<128>::new();
/// assert_eq!(b.fill(&mut SliceReader(b"ab\0cd", false)), Ok(5));
/// assert_eq!(b.payload(), b"ab\0cd");
/// assert_eq!(b.as_c_str().unwrap().as_bytes(), b"ab");
///
/// let mut b = WriteBuffer::<128>::new();
/// assert_eq!(b.fill(&mut SliceReader(b"hello", true)), Err(EFAULT));
/// assert_eq!(b.fill(&mut SliceReader(&input, true)), Err(EFAULT));
/// ```
pub struct WriteBuffer<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> WriteBuffer<N> {
    /// Largest payload accepted by [`WriteBuffer::fill`].
    pub const CAPACITY: usize = N - 1;

    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Copies up to [`Self::CAPACITY`] bytes from `reader` and NUL-terminates them.
    ///
    /// Returns the number of bytes accepted, or `EFAULT` if `reader` cannot be read from.
    pub fn fill(&mut self, reader: &mut impl IoBufferReader) -> Result<usize> {
        let count = core::cmp::min(reader.len(), Self::CAPACITY);
        reader
            .read_slice(&mut self.buf[..count])
            .map_err(|_| EFAULT)?;
        self.buf[count] = 0;
        self.len = count;
        Ok(count)
    }

    /// Returns the accepted payload.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Returns the payload as a C string, i.e., up to its first NUL byte.
    pub fn as_c_str(&self) -> Result<&CStr> {
        let end = self.buf[..=self.len]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.len);
        Ok(CStr::from_bytes_with_nul(&self.buf[..=end])?)
    }
}

impl<const N: usize> Default for WriteBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

struct ProcOpsVtable<T: Operations>(PhantomData<T>);

impl<T: Operations> ProcOpsVtable<T> {
    const PROC_OPS: bindings::proc_ops = bindings::proc_ops {
        proc_open: Some(Self::open_callback),
        proc_release: Some(Self::release_callback),
        proc_read: if T::HAS_READ {
            Some(Self::read_callback)
        } else {
            None
        },
        proc_write: if T::HAS_WRITE {
            Some(Self::write_callback)
        } else {
            None
        },
        proc_lseek: Some(bindings::default_llseek),
        // SAFETY: `proc_ops` is a plain C struct of flags and nullable function pointers, for
        // which all-zeroes is the "not implemented" value.
        ..unsafe { MaybeUninit::<bindings::proc_ops>::zeroed().assume_init() }
    };

    unsafe extern "C" fn open_callback(
        inode: *mut bindings::inode,
        file: *mut bindings::file,
    ) -> c_types::c_int {
        from_kernel_result! {
            // SAFETY: procfs stores the `data` argument of `proc_create_data` in `i_private` of the
            // entry's inodes (this is what the C `pde_data` inline returns). For every entry using
            // this vtable, `register` passed the registration's initialised `open_data`, which
            // outlives the entry.
            let context = unsafe { &*((*inode).i_private as *const T::OpenData) };
            // SAFETY: `file` is valid for the duration of this call.
            let data = T::open(context, unsafe { File::from_ptr(file) })?;
            // SAFETY: `file` is valid and exclusively ours until `open` returns.
            unsafe { (*file).private_data = data.into_pointer() as _ };
            Ok(0)
        }
    }

    unsafe extern "C" fn release_callback(
        _inode: *mut bindings::inode,
        file: *mut bindings::file,
    ) -> c_types::c_int {
        // SAFETY: `private_data` was initialised by `open_callback` with a value returned by
        // `T::Data::into_pointer`, and the C API calls `release` exactly once per opened file.
        let data = unsafe { T::Data::from_pointer((*file).private_data) };
        // SAFETY: `file` is valid for the duration of this call.
        T::release(data, unsafe { File::from_ptr(file) });
        0
    }

    unsafe extern "C" fn read_callback(
        file: *mut bindings::file,
        buf: *mut c_types::c_char,
        len: usize,
        offset: *mut bindings::loff_t,
    ) -> isize {
        from_kernel_result! {
            // SAFETY: The C contract guarantees that `buf` is a user pointer to `len` bytes.
            let mut writer =
                unsafe { UserSlicePtr::new(buf as *mut c_types::c_void, len).writer() };
            // SAFETY: `private_data` was initialised by `open_callback` and is only released in
            // `release_callback`, which cannot run while this call is in progress.
            let data = unsafe { T::Data::borrow((*file).private_data) };
            // SAFETY: `offset` is valid for the duration of this call.
            let pos = unsafe { &mut *offset };
            let start = position(*pos)?;
            // SAFETY: `file` is valid for the duration of this call.
            let read = T::read(data, unsafe { File::from_ptr(file) }, &mut writer, start)?;
            advance(pos, read)?;
            Ok(read as _)
        }
    }

    unsafe extern "C" fn write_callback(
        file: *mut bindings::file,
        buf: *const c_types::c_char,
        len: usize,
        offset: *mut bindings::loff_t,
    ) -> isize {
        from_kernel_result! {
            // SAFETY: The C contract guarantees that `buf` is a user pointer to `len` bytes.
            let mut reader =
                unsafe { UserSlicePtr::new(buf as *mut c_types::c_void, len).reader() };
            // SAFETY: `private_data` was initialised by `open_callback` and is only released in
            // `release_callback`, which cannot run while this call is in progress.
            let data = unsafe { T::Data::borrow((*file).private_data) };
            // SAFETY: `offset` is valid for the duration of this call.
            let pos = position(unsafe { *offset })?;
            // SAFETY: `file` is valid for the duration of this call.
            let written = T::write(data, unsafe { File::from_ptr(file) }, &mut reader, pos)?;
            Ok(written as _)
        }
    }
}
