//! Two agents and a route server over real TCP on loopback.

use std::time::Duration;

use busroute_proto::{BusId, ControlPayload, Endpoint, Packet, RouteCode, ServerInfo};
use busroute_server::{Node, NodeFileConfig, transport::read_packet};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

fn id(addr: &str) -> BusId {
    BusId::parse(addr).unwrap()
}

async fn start(text: &str) -> std::net::SocketAddr {
    let config = NodeFileConfig::parse(text).unwrap();
    let node = Node::bind(&config).await.unwrap();
    let addr = node.local_addr().unwrap();
    tokio::spawn(node.run());
    addr
}

async fn write(stream: &mut TcpStream, packet: &Packet) {
    let mut buf = Vec::new();
    packet.encode(&mut buf).unwrap();
    stream.write_all(&buf).await.unwrap();
}

async fn read(stream: &mut TcpStream) -> Packet {
    timeout(Duration::from_secs(5), read_packet(stream)).await.unwrap().unwrap().unwrap()
}

async fn leaf(agent: std::net::SocketAddr, addr: &str, agent_id: &str) -> TcpStream {
    let mut stream = TcpStream::connect(agent).await.unwrap();
    let register = ControlPayload::ServerRegister(vec![ServerInfo::new(id(addr), addr)].into())
        .into_packet(Endpoint::of(id(addr)), Endpoint::of(id(agent_id)))
        .unwrap();
    write(&mut stream, &register).await;

    let reply = ControlPayload::from_packet(&read(&mut stream).await).unwrap();
    assert_eq!(reply, ControlPayload::ServerRegisterReply(vec![ServerInfo::new(id(addr), addr)].into()));
    stream
}

#[tokio::test]
async fn packet_crosses_zones_through_route_server() {
    let rs = start("role = 'route-server'\nbus_id = '1.0.2.1'\nlisten = '127.0.0.1:0'\n").await;
    let agent_file = |bus_id: &str| {
        format!(
            "role = 'agent'\nbus_id = '{bus_id}'\nlisten = '127.0.0.1:0'\ntick_interval_ms = 10\n\n[[route_servers]]\nbus_id = '1.0.2.1'\nurl = 'tcp://{rs}'\n"
        )
    };
    let agent_a = start(&agent_file("1.1.3.1")).await;
    let agent_b = start(&agent_file("1.2.3.1")).await;

    let mut sender = leaf(agent_a, "1.1.5.1", "1.1.3.1").await;
    let mut receiver = leaf(agent_b, "1.2.7.1", "1.2.3.1").await;

    let message = Packet::application(4, 77, Endpoint::of(id("1.1.5.1")), Endpoint::of(id("1.2.7.1")), &b"hi"[..]);

    // Until both agents have registered and announced, the packet bounces.
    for _ in 0..50 {
        write(&mut sender, &message).await;
        if let Ok(Ok(Some(packet))) = timeout(Duration::from_millis(200), read_packet(&mut receiver)).await {
            assert_eq!(packet.payload.as_ref(), b"hi");
            assert_eq!(packet.header.msg_id(), 77);
            return;
        }
        let bounce = read(&mut sender).await;
        assert_eq!(bounce.err_code(), RouteCode::DestNotExist);
        sleep(Duration::from_millis(50)).await;
    }
    panic!("packet never reached the other zone");
}

#[tokio::test]
async fn same_zone_delivery_needs_no_route_server() {
    let agent = start("role = 'agent'\nbus_id = '1.1.3.1'\nlisten = '127.0.0.1:0'\n").await;
    let mut a = leaf(agent, "1.1.5.1", "1.1.3.1").await;
    let mut b = leaf(agent, "1.1.7.1", "1.1.3.1").await;

    let message = Packet::application(4, 1, Endpoint::of(id("1.1.5.1")), Endpoint::of(id("1.1.7.1")), &b"local"[..]);
    write(&mut a, &message).await;

    assert_eq!(read(&mut b).await.payload.as_ref(), b"local");
}

#[tokio::test]
async fn ticks_redial_route_server_that_came_up_late() {
    let held = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rs = held.local_addr().unwrap();
    drop(held);

    start(&format!(
        "role = 'agent'\nbus_id = '1.1.3.1'\nlisten = '127.0.0.1:0'\ntick_interval_ms = 10\nreconnect_interval_ms = 20\n\n[[route_servers]]\nbus_id = '1.0.2.1'\nurl = 'tcp://{rs}'\n"
    ))
    .await;

    // Let the startup dial fail; only a tick-driven redial can reach the listener now.
    sleep(Duration::from_millis(200)).await;
    let listener = TcpListener::bind(rs).await.unwrap();

    let accepted = timeout(Duration::from_secs(5), listener.accept()).await;
    assert!(accepted.is_ok_and(|r| r.is_ok()), "agent never redialed the route server");
}
