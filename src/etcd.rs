use super::{
    cluster::Member,
    membership::{ClusterMembership, MembershipError},
};
use anyhow::Context;
use reqwest::blocking::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const MEMBER_LIST_PATH: &str = "/v3/cluster/member/list";
const MEMBER_ADD_PATH: &str = "/v3/cluster/member/add";
const MEMBER_REMOVE_PATH: &str = "/v3/cluster/member/remove";

// The JSON gateway encodes 64-bit integers as strings.
#[derive(Clone, Debug, Default, Deserialize)]
struct MemberMessage {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "peerURLs", default)]
    peer_urls: Vec<String>,
}

impl MemberMessage {
    fn peer_url(&self) -> &str {
        self.peer_urls.first().map(String::as_str).unwrap_or("")
    }
}

impl From<MemberMessage> for Member {
    fn from(m: MemberMessage) -> Self {
        let peer_url = m.peer_url().to_string();
        Member::new(m.name, peer_url)
    }
}

#[derive(Debug, Default, Deserialize)]
struct MemberListResponse {
    #[serde(default)]
    members: Vec<MemberMessage>,
}

#[derive(Serialize)]
struct MemberListRequest {}

#[derive(Serialize)]
struct MemberAddRequest<'a> {
    #[serde(rename = "peerURLs")]
    peer_urls: [&'a str; 1],
}

#[derive(Serialize)]
struct MemberRemoveRequest<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
}

/// A membership client for etcd's v3 JSON gateway.
///
/// Each call goes to the first endpoint that answers. An endpoint that can't be reached is skipped,
/// but a response from any endpoint, successful or not, is final.
pub struct EtcdCluster {
    logger: slog::Logger,
    client: Client,
    endpoints: Vec<String>,
}

impl EtcdCluster {
    pub fn new(
        logger: slog::Logger,
        endpoints: Vec<String>,
        timeout: Duration,
    ) -> Result<Self, MembershipError> {
        if endpoints.is_empty() {
            return Err(MembershipError::NoEndpoints);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "unable to build http client")?;
        Ok(Self {
            logger,
            client,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        req: &Req,
    ) -> Result<Resp, MembershipError> {
        let mut last_err = MembershipError::NoEndpoints;
        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, path);
            let resp = match self.client.post(&url).json(req).send() {
                Ok(resp) => resp,
                Err(source) => {
                    debug!(self.logger, "etcd endpoint unavailable"; "url" => &url, "error" => %source);
                    last_err = MembershipError::Transport {
                        endpoint: endpoint.clone(),
                        source,
                    };
                    continue;
                }
            };
            return decode_response(endpoint, resp);
        }
        Err(last_err)
    }

    fn list(&self) -> Result<Vec<MemberMessage>, MembershipError> {
        let resp: MemberListResponse = self.post(MEMBER_LIST_PATH, &MemberListRequest {})?;
        Ok(resp.members)
    }
}

fn decode_response<Resp: DeserializeOwned>(
    endpoint: &str,
    resp: reqwest::blocking::Response,
) -> Result<Resp, MembershipError> {
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|source| MembershipError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;
    if !status.is_success() {
        return Err(MembershipError::Status {
            endpoint: endpoint.to_string(),
            status,
            body,
        });
    }
    serde_json::from_str(&body).map_err(|source| MembershipError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn find_member_id<'a>(members: &'a [MemberMessage], peer_url: &str) -> Option<&'a str> {
    members
        .iter()
        .find(|m| m.peer_urls.iter().any(|u| u == peer_url))
        .map(|m| m.id.as_str())
}

impl ClusterMembership for EtcdCluster {
    fn members(&self) -> Result<Vec<Member>, MembershipError> {
        Ok(self.list()?.into_iter().map(Member::from).collect())
    }

    fn add_member(&self, peer_url: &str) -> Result<(), MembershipError> {
        let _: serde_json::Value = self.post(
            MEMBER_ADD_PATH,
            &MemberAddRequest {
                peer_urls: [peer_url],
            },
        )?;
        Ok(())
    }

    fn remove_member(&self, peer_url: &str) -> Result<(), MembershipError> {
        let members = self.list()?;
        let id = find_member_id(&members, peer_url)
            .ok_or_else(|| MembershipError::UnknownMember(peer_url.to_string()))?;
        let _: serde_json::Value = self.post(MEMBER_REMOVE_PATH, &MemberRemoveRequest { id })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::{TcpListener, TcpStream},
        sync::{Arc, Mutex},
    };

    type Requests = Arc<Mutex<Vec<(String, String)>>>;

    // Reads one request and returns its path and body.
    fn read_request(stream: &mut TcpStream) -> (String, String) {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }

        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
        let path = request_line.split_whitespace().nth(1).unwrap().to_string();
        (path, String::from_utf8(body).unwrap())
    }

    /// Serves the given responses in order, one per connection, and records every request it
    /// receives.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Requests) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let requests = Requests::default();
        let recorded = requests.clone();
        std::thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let request = read_request(&mut stream);
                recorded.lock().expect("no poison").push(request);
                let reason = if status == 200 { "OK" } else { "Internal Server Error" };
                write!(
                    stream,
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                )
                .unwrap();
            }
        });
        (endpoint, requests)
    }

    fn requests(requests: &Requests) -> Vec<(String, String)> {
        requests.lock().expect("no poison").clone()
    }

    fn cluster(endpoints: Vec<String>) -> EtcdCluster {
        let logger = slog::Logger::root(slog::Discard, o!());
        EtcdCluster::new(logger, endpoints, Duration::from_secs(5)).unwrap()
    }

    const REMOVABLE_MEMBER_LIST: &str = r#"{"members": [
        {"ID": "7", "name": "e1", "peerURLs": ["http://10.50.99.1:2380"]},
        {"ID": "42", "name": "ea", "peerURLs": ["http://10.50.65.2:2380"]}
    ]}"#;

    const MEMBER_LIST: &str = r#"{
        "header": {"cluster_id": "14841639068965178418", "member_id": "10276657743932975437"},
        "members": [
            {
                "ID": "10276657743932975437",
                "name": "e1",
                "peerURLs": ["http://10.50.99.1:2380"],
                "clientURLs": ["http://10.50.99.1:2379"]
            },
            {
                "ID": "4039947854213093133",
                "peerURLs": ["http://10.50.199.1:2380"]
            }
        ]
    }"#;

    #[test]
    fn test_decode_member_list() {
        let resp: MemberListResponse = serde_json::from_str(MEMBER_LIST).unwrap();
        let members: Vec<Member> = resp.members.into_iter().map(Member::from).collect();
        assert_eq!(
            members,
            vec![
                Member::new("e1", "http://10.50.99.1:2380"),
                Member::new("", "http://10.50.199.1:2380"),
            ]
        );
        assert!(members[0].is_started());
        assert!(!members[1].is_started());
    }

    #[test]
    fn test_decode_empty_member_list() {
        let resp: MemberListResponse = serde_json::from_str(r#"{"header": {}}"#).unwrap();
        assert!(resp.members.is_empty());

        // a member without peer urls still shows up, just without an address
        let resp: MemberListResponse =
            serde_json::from_str(r#"{"members": [{"ID": "1", "name": "e1"}]}"#).unwrap();
        assert_eq!(
            Member::from(resp.members[0].clone()),
            Member::new("e1", "")
        );
    }

    #[test]
    fn test_find_member_id() {
        let resp: MemberListResponse = serde_json::from_str(MEMBER_LIST).unwrap();
        assert_eq!(
            find_member_id(&resp.members, "http://10.50.199.1:2380"),
            Some("4039947854213093133")
        );
        assert_eq!(find_member_id(&resp.members, "http://10.50.65.2:2380"), None);
    }

    #[test]
    fn test_encode_requests() {
        assert_eq!(
            serde_json::to_string(&MemberAddRequest {
                peer_urls: ["http://10.50.199.1:2380"]
            })
            .unwrap(),
            r#"{"peerURLs":["http://10.50.199.1:2380"]}"#
        );
        assert_eq!(
            serde_json::to_string(&MemberRemoveRequest {
                id: "4039947854213093133"
            })
            .unwrap(),
            r#"{"ID":"4039947854213093133"}"#
        );
        assert_eq!(serde_json::to_string(&MemberListRequest {}).unwrap(), "{}");
    }

    #[test]
    fn test_no_endpoints() {
        let logger = slog::Logger::root(slog::Discard, o!());
        assert!(matches!(
            EtcdCluster::new(logger, vec![], DEFAULT_TIMEOUT),
            Err(MembershipError::NoEndpoints)
        ));
    }

    #[test]
    fn test_unreachable_endpoints() {
        let logger = slog::Logger::root(slog::Discard, o!());
        // nothing listens on port 1 of the loopback address
        let cluster = EtcdCluster::new(
            logger,
            vec!["http://127.0.0.1:1/".to_string(), "http://127.0.0.1:1".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(cluster.endpoints[0], "http://127.0.0.1:1");
        assert!(matches!(
            cluster.members(),
            Err(MembershipError::Transport { .. })
        ));
    }

    #[test]
    fn test_skips_unreachable_endpoint() {
        let (endpoint, reqs) = serve(vec![(200, MEMBER_LIST)]);
        let cluster = cluster(vec!["http://127.0.0.1:1".to_string(), endpoint]);

        assert_eq!(
            cluster.members().unwrap(),
            vec![
                Member::new("e1", "http://10.50.99.1:2380"),
                Member::new("", "http://10.50.199.1:2380"),
            ]
        );
        assert_eq!(
            requests(&reqs),
            vec![(MEMBER_LIST_PATH.to_string(), "{}".to_string())]
        );
    }

    // An endpoint that answers with an error is final, even if other endpoints might succeed.
    #[test]
    fn test_error_status() {
        let (failing, failing_reqs) = serve(vec![(500, r#"{"error": "etcdserver: too many requests"}"#)]);
        let (healthy, healthy_reqs) = serve(vec![(200, "{}")]);
        let cluster = cluster(vec![failing, healthy]);

        match cluster.add_member("http://10.50.199.1:2380") {
            Err(MembershipError::Status { status, body, .. }) => {
                assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.contains("too many requests"));
            }
            r => panic!("unexpected result: {:?}", r),
        }
        assert_eq!(
            requests(&failing_reqs),
            vec![(
                MEMBER_ADD_PATH.to_string(),
                r#"{"peerURLs":["http://10.50.199.1:2380"]}"#.to_string()
            )]
        );
        assert!(requests(&healthy_reqs).is_empty());
    }

    #[test]
    fn test_remove_member() {
        let (endpoint, reqs) = serve(vec![(200, REMOVABLE_MEMBER_LIST), (200, "{}")]);
        let cluster = cluster(vec![endpoint]);

        cluster.remove_member("http://10.50.65.2:2380").unwrap();
        assert_eq!(
            requests(&reqs),
            vec![
                (MEMBER_LIST_PATH.to_string(), "{}".to_string()),
                (MEMBER_REMOVE_PATH.to_string(), r#"{"ID":"42"}"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_remove_unknown_member() {
        let (endpoint, reqs) = serve(vec![(200, REMOVABLE_MEMBER_LIST)]);
        let cluster = cluster(vec![endpoint]);

        assert!(matches!(
            cluster.remove_member("http://10.50.44.44:2380"),
            Err(MembershipError::UnknownMember(url)) if url == "http://10.50.44.44:2380"
        ));
        // nothing is removed when the member can't be found
        assert_eq!(
            requests(&reqs),
            vec![(MEMBER_LIST_PATH.to_string(), "{}".to_string())]
        );
    }
}
