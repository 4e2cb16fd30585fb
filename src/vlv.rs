//! Virtual list view searches. Each request carries a sort control alongside the VLV control.

use crate::connection::Connection;
use crate::controls::{RequestControl, ResponseControl, SortKey, SortRequestControl, VlvRequestControl, VlvResponseControl, VlvTarget};
use crate::error::{Error, Result};
use crate::protocol::{Request, SearchRequest, SearchResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlvPosition {
    /// Zero-based offset into the sorted result.
    Offset(u32),
    /// First entry whose sort key is greater than or equal to this value.
    Assertion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlvParams {
    pub before_count: i32,
    pub after_count: i32,
    pub position: VlvPosition,
}

impl VlvParams {
    fn control(&self) -> VlvRequestControl {
        let target = match self.position {
            VlvPosition::Offset(offset) => VlvTarget::ByOffset {
                offset,
                content_count: 0,
            },
            VlvPosition::Assertion(ref value) => VlvTarget::GreaterOrEqual(value.as_bytes().to_vec()),
        };
        VlvRequestControl::new(self.before_count, self.after_count, target)
    }
}

pub struct VlvClient<'a, C> {
    conn: &'a C,
    sort: SortRequestControl,
}

impl<'a, C: Connection> VlvClient<'a, C> {
    pub fn new(conn: &'a C, sort_keys: Vec<SortKey>) -> Self {
        Self {
            conn,
            sort: SortRequestControl::new(sort_keys),
        }
    }

    async fn send(&self, request: &SearchRequest, vlv: VlvRequestControl) -> Result<SearchResponse> {
        self.conn
            .submit(Request::Search(request.clone()), vec![self.sort.to_control(), vlv.to_control()])
            .await?
            .search_response()
            .await
    }

    pub async fn execute(&self, request: &SearchRequest, params: &VlvParams) -> Result<SearchResponse> {
        self.send(request, params.control()).await
    }

    /// Next window, reusing the server's context id and, for offset targets, its content count.
    pub async fn execute_after(
        &self,
        request: &SearchRequest,
        params: &VlvParams,
        prior: &SearchResponse,
    ) -> Result<SearchResponse> {
        let response = VlvResponseControl::find(&prior.result.controls)?
            .ok_or_else(|| Error::InvalidArgument("response has no virtual list view control".to_string()))?;
        let mut control = params.control();
        control.context_id = response.context_id;
        if let VlvTarget::ByOffset {
            ref mut content_count, ..
        } = control.target
        {
            *content_count = response.content_count;
        }
        self.send(request, control).await
    }
}

/// Server's view of the list after a VLV search.
pub fn response_control(response: &SearchResponse) -> Result<Option<VlvResponseControl>> {
    VlvResponseControl::find(&response.result.controls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockConnection, Reply};
    use crate::controls::sort::SORT_REQUEST_OID;
    use crate::controls::vlv::{VLV_REQUEST_OID, VLV_RESPONSE_OID};
    use crate::protocol::{Control, LdapResult, Response, ResultCode, SearchScope};

    fn done_with_vlv(content_count: i32, context: &[u8]) -> Reply {
        let vlv = VlvResponseControl {
            target_position: 1,
            content_count,
            result: ResultCode::SUCCESS,
            context_id: Some(context.to_vec()),
        };
        let mut result = LdapResult::new(ResultCode::SUCCESS);
        result
            .controls
            .push(Control::new(VLV_RESPONSE_OID, false, Some(vlv.encode_value())));
        Reply::Messages(vec![Response::Done(result)])
    }

    fn sent_vlv(conn: &MockConnection, index: usize) -> Vec<u8> {
        let submitted = conn.submitted();
        let controls = &submitted[index].2;
        assert_eq!(controls[0].oid, SORT_REQUEST_OID);
        assert_eq!(controls[1].oid, VLV_REQUEST_OID);
        controls[1].value.clone().unwrap()
    }

    fn request() -> SearchRequest {
        SearchRequest::new("ou=People,dc=example", SearchScope::SingleLevel, "(objectClass=person)")
    }

    #[tokio::test]
    async fn test_offset_follow_up_copies_count_and_context() {
        let conn = MockConnection::new(vec![done_with_vlv(250, b"ctx1"), done_with_vlv(250, b"ctx2")]);
        let client = VlvClient::new(&conn, vec![SortKey::new("sn")]);
        let params = VlvParams {
            before_count: 0,
            after_count: 9,
            position: VlvPosition::Offset(10),
        };
        let first = client.execute(&request(), &params).await.unwrap();
        assert_eq!(response_control(&first).unwrap().unwrap().content_count, 250);
        client.execute_after(&request(), &params, &first).await.unwrap();

        let mut expected = params.control();
        assert_eq!(sent_vlv(&conn, 0), expected.encode_value().unwrap());
        expected.context_id = Some(b"ctx1".to_vec());
        expected.target = VlvTarget::ByOffset {
            offset: 10,
            content_count: 250,
        };
        assert_eq!(sent_vlv(&conn, 1), expected.encode_value().unwrap());
    }

    #[tokio::test]
    async fn test_assertion_follow_up_copies_context_only() {
        let conn = MockConnection::new(vec![done_with_vlv(40, b"c"), done_with_vlv(40, b"c")]);
        let client = VlvClient::new(&conn, vec![SortKey::new("cn")]);
        let params = VlvParams {
            before_count: 2,
            after_count: 2,
            position: VlvPosition::Assertion("m".to_string()),
        };
        let first = client.execute(&request(), &params).await.unwrap();
        client.execute_after(&request(), &params, &first).await.unwrap();

        let mut expected = params.control();
        expected.context_id = Some(b"c".to_vec());
        assert_eq!(sent_vlv(&conn, 1), expected.encode_value().unwrap());
    }

    #[tokio::test]
    async fn test_follow_up_without_control() {
        let conn = MockConnection::new(Vec::new());
        let client = VlvClient::new(&conn, vec![SortKey::new("cn")]);
        let params = VlvParams {
            before_count: 0,
            after_count: 1,
            position: VlvPosition::Offset(0),
        };
        let bare = SearchResponse::new(LdapResult::new(ResultCode::SUCCESS));
        assert!(matches!(
            client.execute_after(&request(), &params, &bare).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
