use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::utils::get_listener_on_free_port;

const VERSION: &str = "1.6.0-fake";

const REQUEST_MAGIC: u8 = 0x80;
const RESPONSE_MAGIC: u8 = 0x81;

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_ADD: u8 = 0x02;
const OP_REPLACE: u8 = 0x03;
const OP_DELETE: u8 = 0x04;
const OP_QUIT: u8 = 0x07;
const OP_FLUSH: u8 = 0x08;
const OP_NOOP: u8 = 0x0a;
const OP_VERSION: u8 = 0x0b;

const STATUS_OK: u16 = 0x00;
const STATUS_KEY_NOT_FOUND: u16 = 0x01;
const STATUS_UNKNOWN_COMMAND: u16 = 0x81;

#[derive(Default)]
struct State {
    entries: Mutex<HashMap<String, (u32, Vec<u8>)>>,
    stall_reads: AtomicBool,
    shutdown: AtomicBool,
}

impl State {
    /// Blocks a read until the endpoint shuts down, if reads are stalled.
    /// Returns `true` when the read was stalled.
    fn stall(&self) -> bool {
        if !self.stall_reads.load(Ordering::SeqCst) {
            return false;
        }
        while !self.shutdown.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(20));
        }
        true
    }
}

/// A loopback endpoint that answers the subset of the memcached protocols
/// the `memcache` client uses for `set`, `get` and connection checks.
///
/// Both the text and the binary protocol are understood; each connection is
/// classified by its first byte. Connections are served on their own threads
/// and share one key space.
pub struct FakeMemcached {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeMemcached {
    pub fn start() -> FakeMemcached {
        let listener = get_listener_on_free_port();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        thread::spawn(move || accept_loop(listener, accept_state));

        FakeMemcached { addr, state }
    }

    /// `host:port` of the endpoint.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// A `memcache://` URL with no protocol selected, so the client picks the
    /// binary protocol.
    pub fn url(&self) -> String {
        format!("memcache://{}", self.addr)
    }

    /// From now on, answer `version` and writes as usual but never reply to
    /// a `get`. Clients without a read timeout hang until the endpoint is
    /// dropped.
    pub fn stall_reads(&self) {
        self.state.stall_reads.store(true, Ordering::SeqCst);
    }

    /// Store a value as if a client had written it.
    pub fn insert(&self, key: &str, value: &str) {
        self.state
            .entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), (0, value.as_bytes().to_vec()));
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
    }

    pub fn len(&self) -> usize {
        self.state.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FakeMemcached {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::SeqCst);
        // wake the accept loop so it can observe the flag
        let _ = TcpStream::connect(self.addr);
    }
}

fn accept_loop(listener: TcpListener, state: Arc<State>) {
    for stream in listener.incoming() {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Ok(stream) = stream else { break };
        let state = state.clone();
        thread::spawn(move || {
            if let Err(err) = serve(stream, &state) {
                trace!("fake memcached connection closed: {err}");
            }
        });
    }
}

fn serve(stream: TcpStream, state: &State) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let writer = stream;

    let first = match reader.fill_buf()? {
        [] => return Ok(()),
        [first, ..] => *first,
    };
    if first == REQUEST_MAGIC {
        serve_binary(reader, writer, state)
    } else {
        serve_text(reader, writer, state)
    }
}

fn serve_text(
    mut reader: BufReader<TcpStream>,
    mut writer: TcpStream,
    state: &State,
) -> io::Result<()> {
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        trace!("fake memcached <- {parts:?}");

        match parts.as_slice() {
            ["version"] => write!(writer, "VERSION {VERSION}\r\n")?,
            ["set", key, flags, _exptime, bytes, rest @ ..] => {
                let (Ok(flags), Ok(len)) = (flags.parse::<u32>(), bytes.parse::<usize>()) else {
                    writer.write_all(b"CLIENT_ERROR bad command line format\r\n")?;
                    continue;
                };
                let mut data = vec![0; len + 2];
                reader.read_exact(&mut data)?;
                data.truncate(len);
                state
                    .entries
                    .lock()
                    .unwrap()
                    .insert((*key).to_owned(), (flags, data));
                if !rest.contains(&"noreply") {
                    writer.write_all(b"STORED\r\n")?;
                }
            }
            [cmd @ ("get" | "gets"), keys @ ..] => {
                if state.stall() {
                    return Ok(());
                }
                let entries = state.entries.lock().unwrap();
                for key in keys {
                    if let Some((flags, data)) = entries.get(*key) {
                        if *cmd == "gets" {
                            write!(writer, "VALUE {key} {flags} {} 0\r\n", data.len())?;
                        } else {
                            write!(writer, "VALUE {key} {flags} {}\r\n", data.len())?;
                        }
                        writer.write_all(data)?;
                        writer.write_all(b"\r\n")?;
                    }
                }
                writer.write_all(b"END\r\n")?;
            }
            ["delete", key, ..] => {
                let reply: &[u8] = match state.entries.lock().unwrap().remove(*key) {
                    Some(_) => b"DELETED\r\n",
                    None => b"NOT_FOUND\r\n",
                };
                writer.write_all(reply)?;
            }
            ["flush_all", ..] => {
                state.entries.lock().unwrap().clear();
                writer.write_all(b"OK\r\n")?;
            }
            ["quit"] => return Ok(()),
            _ => writer.write_all(b"ERROR\r\n")?,
        }
        writer.flush()?;
    }
}

/// A binary protocol request: the fixed 24-byte header followed by extras,
/// key and value.
struct Request {
    opcode: u8,
    opaque: u32,
    extras: Vec<u8>,
    key: String,
    value: Vec<u8>,
}

fn read_request(reader: &mut impl Read) -> io::Result<Option<Request>> {
    let mut header = [0u8; 24];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    if header[0] != REQUEST_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad request magic {:#x}", header[0]),
        ));
    }

    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    if body_len < key_len + extras_len {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short body"));
    }

    let mut body = vec![0; body_len];
    reader.read_exact(&mut body)?;
    let value = body.split_off(extras_len + key_len);
    let key = body.split_off(extras_len);

    Ok(Some(Request {
        opcode: header[1],
        opaque,
        extras: body,
        key: String::from_utf8_lossy(&key).into_owned(),
        value,
    }))
}

fn write_response(
    writer: &mut impl Write,
    request: &Request,
    status: u16,
    extras: &[u8],
    value: &[u8],
) -> io::Result<()> {
    let body_len = (extras.len() + value.len()) as u32;
    let mut header = [0u8; 24];
    header[0] = RESPONSE_MAGIC;
    header[1] = request.opcode;
    header[4] = extras.len() as u8;
    header[6..8].copy_from_slice(&status.to_be_bytes());
    header[8..12].copy_from_slice(&body_len.to_be_bytes());
    header[12..16].copy_from_slice(&request.opaque.to_be_bytes());

    writer.write_all(&header)?;
    writer.write_all(extras)?;
    writer.write_all(value)?;
    writer.flush()
}

fn serve_binary(
    mut reader: BufReader<TcpStream>,
    mut writer: TcpStream,
    state: &State,
) -> io::Result<()> {
    while let Some(request) = read_request(&mut reader)? {
        trace!(
            "fake memcached <- opcode {:#04x} {:?}",
            request.opcode,
            request.key
        );

        match request.opcode {
            OP_VERSION => write_response(&mut writer, &request, STATUS_OK, &[], VERSION.as_bytes())?,
            OP_SET | OP_ADD | OP_REPLACE => {
                let flags = match request.extras.get(..4) {
                    Some(flags) => u32::from_be_bytes([flags[0], flags[1], flags[2], flags[3]]),
                    None => 0,
                };
                state
                    .entries
                    .lock()
                    .unwrap()
                    .insert(request.key.clone(), (flags, request.value.clone()));
                write_response(&mut writer, &request, STATUS_OK, &[], &[])?;
            }
            OP_GET => {
                if state.stall() {
                    return Ok(());
                }
                let entry = state.entries.lock().unwrap().get(&request.key).cloned();
                match entry {
                    Some((flags, data)) => {
                        write_response(&mut writer, &request, STATUS_OK, &flags.to_be_bytes(), &data)?
                    }
                    None => write_response(
                        &mut writer,
                        &request,
                        STATUS_KEY_NOT_FOUND,
                        &[],
                        b"Not found",
                    )?,
                }
            }
            OP_DELETE => {
                let status = match state.entries.lock().unwrap().remove(&request.key) {
                    Some(_) => STATUS_OK,
                    None => STATUS_KEY_NOT_FOUND,
                };
                write_response(&mut writer, &request, status, &[], &[])?;
            }
            OP_FLUSH => {
                state.entries.lock().unwrap().clear();
                write_response(&mut writer, &request, STATUS_OK, &[], &[])?;
            }
            OP_NOOP => write_response(&mut writer, &request, STATUS_OK, &[], &[])?,
            OP_QUIT => return Ok(()),
            _ => write_response(
                &mut writer,
                &request,
                STATUS_UNKNOWN_COMMAND,
                &[],
                b"Unknown command",
            )?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, request: &str) -> String {
        stream.write_all(request.as_bytes()).unwrap();
        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        reply
    }

    #[test]
    fn speaks_the_text_protocol() {
        let server = FakeMemcached::start();
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        assert_eq!(
            exchange(&mut stream, &mut reader, "version\r\n"),
            "VERSION 1.6.0-fake\r\n"
        );
        assert_eq!(
            exchange(&mut stream, &mut reader, "set foo 0 0 3\r\nbar\r\n"),
            "STORED\r\n"
        );
        assert_eq!(
            exchange(&mut stream, &mut reader, "get foo\r\n"),
            "VALUE foo 0 3\r\n"
        );
        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "bar\r\nEND\r\n");

        assert_eq!(exchange(&mut stream, &mut reader, "get bob\r\n"), "END\r\n");
        assert_eq!(exchange(&mut stream, &mut reader, "bogus\r\n"), "ERROR\r\n");
        assert_eq!(server.value("foo").as_deref(), Some("bar"));
    }

    fn binary_request(opcode: u8, extras: &[u8], key: &str, value: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 24];
        packet[0] = REQUEST_MAGIC;
        packet[1] = opcode;
        packet[2..4].copy_from_slice(&(key.len() as u16).to_be_bytes());
        packet[4] = extras.len() as u8;
        let body_len = (extras.len() + key.len() + value.len()) as u32;
        packet[8..12].copy_from_slice(&body_len.to_be_bytes());
        packet[12..16].copy_from_slice(&7u32.to_be_bytes());
        packet.extend_from_slice(extras);
        packet.extend_from_slice(key.as_bytes());
        packet.extend_from_slice(value);
        packet
    }

    /// Returns (status, extras, value) of the next binary response.
    fn binary_response(stream: &mut TcpStream) -> (u16, Vec<u8>, Vec<u8>) {
        let mut header = [0u8; 24];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(header[0], RESPONSE_MAGIC);
        assert_eq!(&header[12..16], &7u32.to_be_bytes());
        let status = u16::from_be_bytes([header[6], header[7]]);
        let extras_len = header[4] as usize;
        let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut body = vec![0; body_len];
        stream.read_exact(&mut body).unwrap();
        let value = body.split_off(extras_len);
        (status, body, value)
    }

    #[test]
    fn speaks_the_binary_protocol() {
        let server = FakeMemcached::start();
        let mut stream = TcpStream::connect(server.addr()).unwrap();

        stream
            .write_all(&binary_request(OP_VERSION, &[], "", &[]))
            .unwrap();
        assert_eq!(
            binary_response(&mut stream),
            (STATUS_OK, vec![], VERSION.as_bytes().to_vec())
        );

        let extras = [0, 0, 0, 5, 0, 0, 0, 0];
        stream
            .write_all(&binary_request(OP_SET, &extras, "foo", b"bar"))
            .unwrap();
        assert_eq!(binary_response(&mut stream).0, STATUS_OK);

        stream
            .write_all(&binary_request(OP_GET, &[], "foo", &[]))
            .unwrap();
        assert_eq!(
            binary_response(&mut stream),
            (STATUS_OK, vec![0, 0, 0, 5], b"bar".to_vec())
        );

        stream
            .write_all(&binary_request(OP_GET, &[], "bob", &[]))
            .unwrap();
        assert_eq!(binary_response(&mut stream).0, STATUS_KEY_NOT_FOUND);

        stream.write_all(&binary_request(0x30, &[], "", &[])).unwrap();
        assert_eq!(binary_response(&mut stream).0, STATUS_UNKNOWN_COMMAND);
        assert_eq!(server.value("foo").as_deref(), Some("bar"));
    }

    #[test]
    fn stalled_reads_still_accept_writes() {
        let server = FakeMemcached::start();
        server.stall_reads();
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        assert_eq!(
            exchange(&mut stream, &mut reader, "set foo 0 0 3\r\nbar\r\n"),
            "STORED\r\n"
        );
        stream.write_all(b"get foo\r\n").unwrap();
        let mut reply = String::new();
        let err = reader.read_line(&mut reply).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn inserted_values_are_visible_to_clients() {
        let server = FakeMemcached::start();
        server.insert("bob", "present");
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        assert_eq!(
            exchange(&mut stream, &mut reader, "get bob\r\n"),
            "VALUE bob 0 7\r\n"
        );
        assert_eq!(server.len(), 1);
    }
}
