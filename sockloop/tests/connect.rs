#[cfg(test)]
mod tests {
    use sockloop::net::ANY_ADDRESS;
    use sockloop::{ConnectError, Connection, Error, PollError, Reactor, ReactorBuilder, State};

    use std::cell::{Cell, RefCell};
    use std::io::{ErrorKind, Read, Write};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
    use std::rc::Rc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn tick_until(reactor: &mut Reactor, mut done: impl FnMut(&Reactor) -> bool) -> bool {
        for _ in 0..1000 {
            reactor.tick().expect("Failed to tick");
            if done(reactor) {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }

        false
    }

    fn local_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        (listener, port)
    }

    fn counter() -> Rc<Cell<u32>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn test_connect_fires_on_connect() {
        let (listener, port) = local_listener();
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        let errors = counter();
        {
            let connects = connects.clone();
            let errors = errors.clone();
            let connection = reactor.connection_mut(id).expect("Connection vanished");
            connection.set_connect_callback(move |reactor, id| {
                assert!(reactor.connection(id).expect("Connection vanished").is_ready());
                connects.set(connects.get() + 1);
            });
            connection.set_connect_error_callback(move |_, _| errors.set(errors.get() + 1));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        let (peer, _) = listener.accept().expect("Failed to accept");

        assert!(tick_until(&mut reactor, |_| connects.get() > 0));

        for _ in 0..5 {
            reactor.tick().expect("Failed to tick");
        }
        assert_eq!(connects.get(), 1);
        assert_eq!(errors.get(), 0);

        let connection = reactor.connection(id).expect("Connection vanished");
        assert_eq!(connection.state(), State::Ready);
        assert!(connection.is_reading());
        assert_eq!(
            connection.remote_addr(),
            Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
        );

        let peer_remote = peer.peer_addr().expect("Failed to get peer address");
        assert_eq!(
            connection.local_addr().map(SocketAddr::V4),
            Some(peer_remote)
        );
    }

    #[test]
    fn test_client_reads_without_start_read() {
        let (listener, port) = local_listener();
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        let received = Rc::new(RefCell::new(Vec::new()));
        {
            let received = received.clone();
            reactor
                .connection_mut(id)
                .expect("Connection vanished")
                .set_read_callback(move |_, _, bytes| received.borrow_mut().extend_from_slice(bytes));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");

        let (mut peer, _) = listener.accept().expect("Failed to accept");
        peer.write_all(b"pong").expect("Failed to write to stream");

        assert!(tick_until(&mut reactor, |_| received.borrow().len() >= 4));
        assert_eq!(&received.borrow()[..], b"pong");
    }

    #[test]
    fn test_send_while_connecting_is_held_until_ready() {
        let (listener, port) = local_listener();
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        reactor.send(id, b"queued").expect("Failed to queue");

        let connection = reactor.connection(id).expect("Connection vanished");
        assert!(matches!(connection.state(), State::Connecting | State::Ready));
        assert_eq!(connection.pending_outbound(), 6);

        let (mut peer, _) = listener.accept().expect("Failed to accept");
        peer.set_nonblocking(true)
            .expect("Failed to set non-blocking");

        let mut received = Vec::new();
        let done = tick_until(&mut reactor, |_| {
            let mut buffer = [0; 64];
            match peer.read(&mut buffer) {
                Ok(n) => received.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("read failed: {e}"),
            }
            received.len() >= 6
        });

        assert!(done);
        assert_eq!(&received[..], b"queued");
        assert!(
            !reactor
                .connection(id)
                .expect("Connection vanished")
                .has_pending_outbound()
        );
    }

    #[test]
    fn test_large_payload_arrives_in_order() {
        let (listener, port) = local_listener();
        let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let handle = thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("Failed to accept");

            let mut received = Vec::new();
            peer.read_to_end(&mut received)
                .expect("Failed to read from stream");
            received
        });

        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();
        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        reactor.send(id, &payload).expect("Failed to queue");

        assert!(tick_until(&mut reactor, |reactor| {
            reactor
                .connection(id)
                .is_some_and(|connection| connection.is_ready() && !connection.has_pending_outbound())
        }));

        reactor.destroy(id).expect("Failed to destroy connection");

        let received = handle.join().expect("Thread panicked");
        assert_eq!(received.len(), expected.len());
        assert!(received == expected);
    }

    #[test]
    fn test_connect_refused() {
        let (listener, port) = local_listener();
        drop(listener);

        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        let errors = counter();
        {
            let connects = connects.clone();
            let errors = errors.clone();
            let connection = reactor.connection_mut(id).expect("Connection vanished");
            connection.set_connect_callback(move |_, _| connects.set(connects.get() + 1));
            connection.set_connect_error_callback(move |reactor, id| {
                let connection = reactor.connection(id).expect("Connection vanished");
                assert!(connection.is_closed());
                assert!(connection.last_error().is_some());
                errors.set(errors.get() + 1);
            });
        }

        if let Err(e) = reactor.connect(id, Ipv4Addr::LOCALHOST, port) {
            assert!(matches!(e, Error::Connect { .. }));
        }

        assert!(tick_until(&mut reactor, |_| errors.get() > 0));

        for _ in 0..5 {
            reactor.tick().expect("Failed to tick");
        }
        assert_eq!(errors.get(), 1);
        assert_eq!(connects.get(), 0);

        let connection = reactor.connection(id).expect("Connection vanished");
        assert_eq!(connection.state(), State::Closed);
        assert!(matches!(
            connection.last_error(),
            Some(Error::Connect {
                cause: ConnectError::Refused,
                ..
            })
        ));
    }

    /// Loopback listener that never accepts, with its accept queue filled
    /// so that further connects to it hang.
    fn saturated_listener() -> (Reactor, Vec<TcpStream>, u16) {
        let mut reactor = ReactorBuilder::new()
            .backlog(0)
            .build()
            .expect("Failed to create reactor");
        let listener = reactor.create();
        reactor
            .start_accept(listener, Ipv4Addr::LOCALHOST, 0)
            .expect("Failed to start accepting");
        let port = reactor
            .connection(listener)
            .expect("Listener vanished")
            .local_port();

        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        let mut queued = Vec::new();
        for _ in 0..64 {
            match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
                Ok(stream) => queued.push(stream),
                Err(_) => break,
            }
        }

        (reactor, queued, port)
    }

    #[test]
    fn test_connect_timeout() {
        let (_server, _queued, port) = saturated_listener();

        let mut reactor = ReactorBuilder::new()
            .connect_timeout(Duration::from_millis(50))
            .build()
            .expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        let errors = counter();
        {
            let connects = connects.clone();
            let errors = errors.clone();
            let connection = reactor.connection_mut(id).expect("Connection vanished");
            connection.set_connect_callback(move |_, _| connects.set(connects.get() + 1));
            connection.set_connect_error_callback(move |_, _| errors.set(errors.get() + 1));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        assert!(reactor.connection(id).expect("Connection vanished").is_connecting());

        assert!(tick_until(&mut reactor, |_| errors.get() > 0));

        for _ in 0..5 {
            reactor.tick().expect("Failed to tick");
        }
        assert_eq!(errors.get(), 1);
        assert_eq!(connects.get(), 0);

        let connection = reactor.connection(id).expect("Connection vanished");
        assert_eq!(connection.state(), State::Closed);
        assert!(matches!(
            connection.last_error(),
            Some(Error::Connect {
                cause: ConnectError::Timeout(_),
                ..
            })
        ));
    }

    #[test]
    fn test_connect_within_timeout_never_times_out() {
        let (listener, port) = local_listener();
        let mut reactor = ReactorBuilder::new()
            .connect_timeout(Duration::from_millis(50))
            .build()
            .expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        let errors = counter();
        {
            let connects = connects.clone();
            let errors = errors.clone();
            let connection = reactor.connection_mut(id).expect("Connection vanished");
            connection.set_connect_callback(move |_, _| connects.set(connects.get() + 1));
            connection.set_connect_error_callback(move |_, _| errors.set(errors.get() + 1));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        let (_peer, _) = listener.accept().expect("Failed to accept");
        assert!(tick_until(&mut reactor, |_| connects.get() > 0));

        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(250) {
            reactor.tick().expect("Failed to tick");
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(connects.get(), 1);
        assert_eq!(errors.get(), 0);

        let connection = reactor.connection(id).expect("Connection vanished");
        assert_eq!(connection.state(), State::Ready);
        assert!(connection.last_error().is_none());
    }

    #[test]
    fn test_close_fires_no_callbacks() {
        let (listener, port) = local_listener();
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        let fired = counter();
        {
            let connects = connects.clone();
            let close_fired = fired.clone();
            let error_fired = fired.clone();
            let connection = reactor.connection_mut(id).expect("Connection vanished");
            connection.set_connect_callback(move |_, _| connects.set(connects.get() + 1));
            connection.set_close_callback(move |_, _| close_fired.set(close_fired.get() + 1));
            connection
                .set_connect_error_callback(move |_, _| error_fired.set(error_fired.get() + 1));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        let (_peer, _) = listener.accept().expect("Failed to accept");
        assert!(tick_until(&mut reactor, |_| connects.get() > 0));

        reactor.close(id).expect("Failed to close");
        reactor.close(id).expect("Failed to close");

        for _ in 0..10 {
            reactor.tick().expect("Failed to tick");
        }

        assert_eq!(fired.get(), 0);
        assert!(reactor.connection(id).expect("Connection vanished").is_closed());
    }

    #[test]
    fn test_reconnect_after_close() {
        let (listener, port) = local_listener();
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        let connects = counter();
        {
            let connects = connects.clone();
            reactor
                .connection_mut(id)
                .expect("Connection vanished")
                .set_connect_callback(move |_, _| connects.set(connects.get() + 1));
        }

        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        let (_first, _) = listener.accept().expect("Failed to accept");
        assert!(tick_until(&mut reactor, |_| connects.get() == 1));

        reactor.close(id).expect("Failed to close");
        reactor
            .connect(id, Ipv4Addr::LOCALHOST, port)
            .expect("Failed to connect");
        let (_second, _) = listener.accept().expect("Failed to accept");
        assert!(tick_until(&mut reactor, |_| connects.get() == 2));

        assert!(reactor.connection(id).expect("Connection vanished").is_ready());
    }

    #[test]
    fn test_adopted_stream() {
        let (listener, port) = local_listener();
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("Failed to connect");
        let (mut peer, _) = listener.accept().expect("Failed to accept");

        let connection = Connection::from_std(stream).expect("Failed to adopt stream");
        assert!(connection.is_ready());
        assert!(!connection.is_reading());
        assert_eq!(connection.remote_port(), port);

        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.insert(connection);

        let received = Rc::new(RefCell::new(Vec::new()));
        {
            let received = received.clone();
            reactor
                .connection_mut(id)
                .expect("Connection vanished")
                .set_read_callback(move |_, _, bytes| received.borrow_mut().extend_from_slice(bytes));
        }
        reactor.start_read(id).expect("Failed to start reading");

        peer.write_all(b"adopted").expect("Failed to write to stream");
        assert!(tick_until(&mut reactor, |_| received.borrow().len() >= 7));
        assert_eq!(&received.borrow()[..], b"adopted");
    }

    #[test]
    fn test_tick_from_callback_is_refused() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let listener = reactor.create();
        reactor
            .start_accept(listener, ANY_ADDRESS, 0)
            .expect("Failed to start accepting");
        let port = reactor
            .connection(listener)
            .expect("Listener vanished")
            .local_port();

        let refused = Rc::new(Cell::new(false));
        {
            let refused = refused.clone();
            reactor
                .connection_mut(listener)
                .expect("Listener vanished")
                .set_accept_callback(move |reactor, _, _| {
                    refused.set(matches!(reactor.tick(), Err(PollError::Reentrant)));
                });
        }

        let _client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("Failed to connect");
        assert!(tick_until(&mut reactor, |_| refused.get()));
    }

    #[test]
    fn test_unknown_and_idle_connections() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        let id = reactor.create();

        assert!(matches!(reactor.send(id, b"x"), Err(Error::NotConnected)));
        assert!(matches!(reactor.start_read(id), Err(Error::NotConnected)));

        reactor.destroy(id).expect("Failed to destroy connection");
        assert!(!reactor.contains(id));
        assert!(reactor.is_empty());

        assert!(matches!(reactor.destroy(id), Err(Error::UnknownConnection(_))));
        assert!(matches!(reactor.send(id, b"x"), Err(Error::UnknownConnection(_))));
        assert!(matches!(
            reactor.connect(id, Ipv4Addr::LOCALHOST, 1),
            Err(Error::UnknownConnection(_))
        ));

        let replacement = reactor.create();
        assert_ne!(replacement, id);
        assert!(reactor.connection(id).is_none());
    }

    #[test]
    fn test_tick_without_connections() {
        let mut reactor = Reactor::new().expect("Failed to create reactor");
        reactor.tick().expect("Failed to tick");

        let id = reactor.create();
        reactor.tick().expect("Failed to tick");
        assert_eq!(
            reactor.connection(id).expect("Connection vanished").state(),
            State::Idle
        );
    }
}
