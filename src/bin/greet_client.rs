//! Line-oriented greeting client.
//!
//! Connects to the greeting server, answers its `HELLO` with `HELLO`, and
//! exits once the server hangs up.

use muxer::net::StreamTransport;
use muxer::{BufferedSocket, Multiplexer, SharedTransport};

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const SERVER: &str = "127.0.0.1:9999";

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().init();

    let mux = Rc::new(Multiplexer::new());

    let transport: SharedTransport = Rc::new(RefCell::new(StreamTransport::connect(SERVER)?));
    let active = Rc::new(Cell::new(true));
    let socket_slot: Rc<RefCell<Option<BufferedSocket>>> = Rc::new(RefCell::new(None));

    // The pending connect reports completion through write-readiness; only
    // then is the transport handed to a socket.
    let mux_handle = Rc::downgrade(&mux);
    let active_flag = active.clone();
    let slot = socket_slot.clone();
    mux.attach_write(
        transport.clone(),
        Box::new(move |transport, mux_ref| {
            mux_ref.detach_write(transport.borrow().id());
            info!("connected to {SERVER}");

            let Some(mux) = mux_handle.upgrade() else {
                return;
            };
            let socket = match BufferedSocket::new(transport.clone(), &mux) {
                Ok(socket) => socket,
                Err(err) => {
                    warn!("socket setup failed: {err}");
                    active_flag.set(false);
                    return;
                }
            };

            let writer = socket.clone();
            socket.on_input(move |data| {
                let message = String::from_utf8_lossy(data);
                let message = message.trim();
                info!("received {message:?}");

                if message == "HELLO" {
                    thread::sleep(Duration::from_secs(1));
                    writer.write(b"HELLO\n");
                }
            });

            let done = active_flag.clone();
            socket.on_close(move |reason| {
                info!("closed: {reason}");
                done.set(false);
            });
            socket.on_error(|err| warn!("error: {err}"));

            *slot.borrow_mut() = Some(socket);
        }),
    );

    while active.get() {
        mux.dispatch(None)?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
