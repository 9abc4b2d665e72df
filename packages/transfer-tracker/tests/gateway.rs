//! RpcGateway against an in-process JSON-RPC node

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracker::gateway::RpcGateway;
use tracker::rpc::RpcClient;
use transfer_pipeline::capability::{DeployEventRequest, ReleaseQuery};
use transfer_pipeline::testing::fixtures::{evm_configuration, evm_identity, evm_vote, TVM_OWNER};
use transfer_pipeline::{ChainGateway, ErrorClass, GatewayError, NetworkId};

const DEAD_URL: &str = "http://127.0.0.1:1";

#[derive(Clone, Default)]
struct Node {
    transactions: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Node {
    fn params(&self, method: &str) -> Option<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r["method"] == method)
            .map(|r| r["params"].clone())
    }
}

async fn handle(State(node): State<Node>, Json(request): Json<Value>) -> Json<Value> {
    node.requests.lock().unwrap().push(request.clone());
    let mut reply = match request["method"].as_str().unwrap_or_default() {
        "bridge_latest_block" => json!({ "result": 123 }),
        "bridge_deposit" => json!({ "result": null }),
        "bridge_current_round" => json!({ "result": null }),
        "bridge_vault_balance" => json!({ "result": "340282366920938463463374607431768211455" }),
        "bridge_release" => json!({ "result": { "is_released": true, "tx_id": "0xfeed" } }),
        "bridge_deploy_event" => {
            json!({ "error": { "code": -32000, "message": "execution reverted" } })
        }
        "bridge_transactions" => json!({ "result": node.transactions.lock().unwrap().clone() }),
        _ => json!({ "error": { "code": -32601, "message": "Method not found" } }),
    };
    reply["jsonrpc"] = json!("2.0");
    reply["id"] = request["id"].clone();
    Json(reply)
}

async fn spawn_node(node: Node) -> String {
    let app = Router::new().route("/", post(handle)).with_state(node);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn gateway(urls: Vec<String>) -> RpcGateway {
    let rpc = RpcClient::new(urls, Duration::from_secs(2)).unwrap();
    RpcGateway::new(NetworkId::evm("1"), rpc, Duration::from_millis(20))
}

#[tokio::test]
async fn test_falls_back_past_dead_endpoint() {
    let url = spawn_node(Node::default()).await;
    let gateway = gateway(vec![DEAD_URL.to_string(), url]);

    assert_eq!(gateway.latest_block().await.unwrap(), 123);
}

#[tokio::test]
async fn test_all_endpoints_down_is_transient() {
    let gateway = gateway(vec![DEAD_URL.to_string()]);

    let err = gateway.latest_block().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn test_null_results() {
    let url = spawn_node(Node::default()).await;
    let gateway = gateway(vec![url]);

    assert_eq!(gateway.deposit(&evm_identity()).await.unwrap(), None);
    assert!(matches!(
        gateway.current_round().await,
        Err(GatewayError::MissingState(_))
    ));
}

#[tokio::test]
async fn test_amounts_decode_from_strings() {
    let url = spawn_node(Node::default()).await;
    let gateway = gateway(vec![url]);

    assert_eq!(gateway.vault_balance("0xvault").await.unwrap(), u128::MAX);
}

#[tokio::test]
async fn test_rpc_error_is_not_retried_and_classified() {
    let first = Node::default();
    let second = Node::default();
    let gateway = gateway(vec![
        spawn_node(first.clone()).await,
        spawn_node(second.clone()).await,
    ]);

    let request = DeployEventRequest {
        configuration: evm_configuration(),
        vote: evm_vote(),
        sender: TVM_OWNER.to_string(),
    };
    let err = gateway.deploy_event(&request).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Rpc {
            code: -32000,
            message: "execution reverted".into()
        }
    );
    assert_eq!(err.class(), ErrorClass::Permanent);
    assert!(second.params("bridge_deploy_event").is_none());

    let params = first.params("bridge_deploy_event").unwrap();
    assert_eq!(params["vote"]["kind"], "evm");
    assert_eq!(params["sender"], TVM_OWNER);
}

#[tokio::test]
async fn test_release_query_is_tagged() {
    let node = Node::default();
    let gateway = gateway(vec![spawn_node(node.clone()).await]);

    let query = ReleaseQuery::Solana {
        proposal: "11111111111111111111111111111111".into(),
    };
    let receipt = gateway.release(&query).await.unwrap().unwrap();
    assert!(receipt.is_released);
    assert_eq!(receipt.tx_id.as_deref(), Some("0xfeed"));
    assert_eq!(node.params("bridge_release").unwrap()["kind"], "solana");
}

#[tokio::test]
async fn test_unknown_method_is_fatal() {
    let url = spawn_node(Node::default()).await;
    let gateway = gateway(vec![url]);

    let err = gateway.event_blocks_to_confirm(&evm_configuration()).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Fatal);
}

#[tokio::test]
async fn test_subscription_forwards_only_new_transactions() {
    let node = Node::default();
    node.transactions.lock().unwrap().push("0x01".into());
    let gateway = gateway(vec![spawn_node(node.clone()).await]);

    let (tx, mut rx) = mpsc::channel(8);
    let subscription = gateway.subscribe("0xvault", tx).await.unwrap();
    node.transactions.lock().unwrap().push("0x02".into());

    let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.scope, "0xvault");
    assert_eq!(notice.tx_id, "0x02");

    subscription.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}
