//! Answers intercepted DNS queries with synthetic addresses.

use std::net::Ipv4Addr;

use hickory_proto::{
    op::{Message, MessageType, ResponseCode},
    rr::{rdata, DNSClass, RData, Record, RecordType},
};
use tracing::trace;

use crate::allocator::{FakeIp, INVALID_ADDRESS};
use crate::error::{Error, Result};

const FAKE_TTL: u32 = 10;

pub fn hijack_dns(data: &[u8]) -> Result<Message> {
    let msg = match Message::from_vec(data) {
        Ok(msg) => msg,
        Err(e) => {
            trace!("[dns] failed to parse DNS message: {}", e);
            return Err(Error::Dns(e));
        }
    };
    if msg.message_type() != MessageType::Query || msg.query_count() == 0 {
        return Err(Error::Dns("no question in DNS message".into()));
    }
    Ok(msg)
}

/// Builds the response for `query`. `A` questions get a synthetic address,
/// every other type gets an empty answer so the client falls back to `A`.
pub async fn answer_query(fake_ip: &FakeIp, query: &Message) -> Message {
    let mut response = query.clone();
    response.set_message_type(MessageType::Response);
    response.set_recursion_available(true);
    response.set_response_code(ResponseCode::NoError);

    let question = match query.query() {
        Some(question) => question.clone(),
        None => {
            response.set_response_code(ResponseCode::FormErr);
            return response;
        }
    };
    if question.query_type() != RecordType::A {
        trace!("[dns] no fake answer for {} {}", question.query_type(), question.name());
        return response;
    }

    let domain = question.name().to_string().trim_end_matches('.').to_lowercase();
    let ip: Ipv4Addr = fake_ip.get_ip_for_host(&domain).await;
    if ip == INVALID_ADDRESS {
        trace!("[dns] no fake address for {}", domain);
        response.set_response_code(ResponseCode::ServFail);
        return response;
    }
    trace!("[dns] lookup: {} -> {}", domain, ip);
    response.add_answer(
        Record::new()
            .set_name(question.name().clone())
            .set_ttl(FAKE_TTL)
            .set_rr_type(RecordType::A)
            .set_dns_class(DNSClass::IN)
            .set_data(Some(RData::A(rdata::A(ip))))
            .clone(),
    );
    response
}

/// Raw query in, raw response out.
pub async fn handle_dns_packet(fake_ip: &FakeIp, data: &[u8]) -> Result<Vec<u8>> {
    let query = hijack_dns(data)?;
    let response = answer_query(fake_ip, &query).await;
    Ok(response.to_vec()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use hickory_proto::{op::Query, rr::Name};

    fn query(name: &str, record_type: RecordType) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(4242);
        msg.set_message_type(MessageType::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), record_type));
        msg.to_vec().unwrap()
    }

    fn first_a(response: &Message) -> Option<Ipv4Addr> {
        response.answers().iter().find_map(|r| match r.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_a_query_gets_synthetic_address() {
        let fake_ip = FakeIp::init(Config::default()).unwrap();
        let raw = handle_dns_packet(&fake_ip, &query("WWW.Example.com.", RecordType::A))
            .await
            .unwrap();
        let response = Message::from_vec(&raw).unwrap();
        assert_eq!(response.id(), 4242);
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        let ip = first_a(&response).unwrap();
        assert!(fake_ip.is_synthetic(ip));
        assert_eq!(response.answers()[0].ttl(), FAKE_TTL);
        assert_eq!(
            fake_ip.get_host_for_ip(ip).await.as_deref(),
            Some("www.example.com")
        );

        // same name, same answer
        let raw = handle_dns_packet(&fake_ip, &query("www.example.com.", RecordType::A))
            .await
            .unwrap();
        assert_eq!(first_a(&Message::from_vec(&raw).unwrap()), Some(ip));
        fake_ip.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_other_types_get_empty_answer() {
        let fake_ip = FakeIp::init(Config::default()).unwrap();
        let raw = handle_dns_packet(&fake_ip, &query("www.example.com.", RecordType::AAAA))
            .await
            .unwrap();
        let response = Message::from_vec(&raw).unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answer_count(), 0);
        assert_eq!(fake_ip.stats().await.unwrap().entries, 0);
        fake_ip.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_allocator_is_servfail() {
        let fake_ip = FakeIp::init(Config::default().with_max_entries(1)).unwrap();
        handle_dns_packet(&fake_ip, &query("one.example.", RecordType::A))
            .await
            .unwrap();
        let raw = handle_dns_packet(&fake_ip, &query("two.example.", RecordType::A))
            .await
            .unwrap();
        let response = Message::from_vec(&raw).unwrap();
        assert_eq!(response.response_code(), ResponseCode::ServFail);
        assert_eq!(response.answer_count(), 0);
        fake_ip.shutdown().unwrap();
    }

    #[test]
    fn test_hijack_rejects_garbage_and_empty_queries() {
        assert!(hijack_dns(&[1, 2, 3]).is_err());
        let mut msg = Message::new();
        msg.set_message_type(MessageType::Query);
        assert!(hijack_dns(&msg.to_vec().unwrap()).is_err());
        assert!(hijack_dns(&query("a.example.", RecordType::A)).is_ok());
    }
}
