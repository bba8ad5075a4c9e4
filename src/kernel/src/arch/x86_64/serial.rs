//! Serial console on COM1 (0x3F8) and the kernel logger on top of it.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use uart_16550::SerialPort;
use x86_64::instructions::interrupts;

/// COM1 I/O port address.
const COM1_PORT: u16 = 0x3F8;

/// Global serial port instance, lazily initialized.
pub static SERIAL: spin::Once<Mutex<SerialPort>> = spin::Once::new();

fn open() -> Mutex<SerialPort> {
    // SAFETY: COM1 is the standard first serial port and ring 0 has full
    // I/O port access.
    let mut serial = unsafe { SerialPort::new(COM1_PORT) };
    serial.init();
    Mutex::new(serial)
}

fn get_serial() -> &'static Mutex<SerialPort> {
    SERIAL.call_once(open)
}

/// Initializes the global serial port. Idempotent.
pub fn init() {
    get_serial();
}

/// Prints to the serial port without a newline.
#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::arch::x86_64::serial::_print(format_args!($($arg)*))
    };
}

/// Prints to the serial port with a newline.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)))
}

/// Internal print function used by macros.
#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // The port lock is also taken from interrupt context.
    interrupts::without_interrupts(|| {
        get_serial()
            .lock()
            .write_fmt(args)
            .expect("serial write failed");
    });
}

/// `log` backend writing one line per record to the serial port.
struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            _print(format_args!(
                "[{:<5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Installs the serial logger at `level`. Later calls only change the level.
pub fn init_logger(level: LevelFilter) {
    init();
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
