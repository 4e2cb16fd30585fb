//! Chasing referrals and search continuation references.
//!
//! Every hop gets its own connection from the factory, which is closed once
//! the hop's response is in, whatever the outcome.

use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, Result};
use crate::protocol::{Control, LdapResult, Request, ResultCode, SearchReference, SearchRequest, SearchResponse};
use crate::url::LdapUrl;
use tracing::{debug, warn};

pub const DEFAULT_REFERRAL_LIMIT: u32 = 10;

pub struct ReferralFollower<F> {
    factory: F,
    limit: u32,
    throw_on_failure: bool,
}

impl<F: ConnectionFactory> ReferralFollower<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            limit: DEFAULT_REFERRAL_LIMIT,
            throw_on_failure: false,
        }
    }

    /// Most hops followed for one response.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Fail with [`Error::ReferralFailed`] instead of returning the unresolved referral.
    pub fn with_throw_on_failure(mut self, throw_on_failure: bool) -> Self {
        self.throw_on_failure = throw_on_failure;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Submit on `conn` and chase any referral in the result.
    pub async fn execute<C: Connection>(&self, conn: &C, request: &Request, controls: &[Control]) -> Result<LdapResult> {
        let result = conn.submit(request.clone(), controls.to_vec()).await?.result().await?;
        self.follow(request, controls, result).await
    }

    /// Search on `conn`, then chase referrals and continuation references.
    pub async fn search<C: Connection>(
        &self,
        conn: &C,
        request: &SearchRequest,
        controls: &[Control],
    ) -> Result<SearchResponse> {
        let response = conn
            .submit(Request::Search(request.clone()), controls.to_vec())
            .await?
            .search_response()
            .await?;
        self.follow_search(request, controls, response).await
    }

    /// Replay `request` against the first URL of each REFERRAL result until a
    /// server answers with something else.
    pub async fn follow(&self, request: &Request, controls: &[Control], result: LdapResult) -> Result<LdapResult> {
        let mut current = result;
        let mut hops = 0;
        while current.code == ResultCode::REFERRAL {
            let Some(url) = current.referrals.first().cloned() else {
                break;
            };
            hops += 1;
            self.check_limit(hops)?;
            debug!("Following referral {} to {} (hop {})", request.name(), url, hops);
            match self.hop(&url, request.clone(), controls).await {
                Ok(next) => current = next,
                Err(e) => return self.unresolved(url, e, current),
            }
        }
        Ok(current)
    }

    /// [`follow`](Self::follow) for searches. Entries found behind a continuation
    /// reference replace that reference in the response; references that cannot
    /// be resolved stay in place unless `throw_on_failure` is set.
    pub async fn follow_search(
        &self,
        request: &SearchRequest,
        controls: &[Control],
        response: SearchResponse,
    ) -> Result<SearchResponse> {
        let mut response = response;
        let mut hops = 0;
        while response.result.code == ResultCode::REFERRAL {
            let Some(url) = response.result.referrals.first().cloned() else {
                break;
            };
            hops += 1;
            self.check_limit(hops)?;
            debug!("Following search referral to {} (hop {})", url, hops);
            match self.search_hop(&url, request, controls).await {
                Ok(next) => response = next,
                Err(e) => return self.unresolved(url, e, response),
            }
        }

        let mut merged = SearchResponse {
            entries: response.entries,
            references: Vec::new(),
            result: response.result,
        };
        let mut pending: Vec<(SearchReference, u32)> = response.references.into_iter().rev().map(|r| (r, 1)).collect();
        while let Some((reference, depth)) = pending.pop() {
            let Some(url) = reference.urls.first().cloned() else {
                merged.references.push(reference);
                continue;
            };
            self.check_limit(depth)?;
            debug!("Following search reference {} (depth {})", url, depth);
            let found = match self.search_hop(&url, request, controls).await {
                Ok(found) => found,
                Err(e) => {
                    merged.references.push(self.unresolved(url, e, reference)?);
                    continue;
                }
            };
            merged.entries.extend(found.entries);
            if found.result.code == ResultCode::REFERRAL && !found.result.referrals.is_empty() {
                let onward = SearchReference {
                    urls: found.result.referrals,
                    controls: Vec::new(),
                };
                pending.push((onward, depth + 1));
            }
            for next in found.references.into_iter().rev() {
                pending.push((next, depth + 1));
            }
        }
        Ok(merged)
    }

    fn check_limit(&self, hops: u32) -> Result<()> {
        if hops > self.limit {
            warn!("Referral limit {} exceeded", self.limit);
            return Err(Error::ReferralLimitExceeded(self.limit));
        }
        Ok(())
    }

    /// Failure policy for one hop: hand back `unresolved` or wrap the error.
    fn unresolved<T>(&self, url: String, error: Error, unresolved: T) -> Result<T> {
        if self.throw_on_failure {
            return Err(Error::ReferralFailed {
                url,
                source: Box::new(error),
            });
        }
        warn!("Could not follow referral to {}: {}", url, error);
        Ok(unresolved)
    }

    async fn hop(&self, url: &str, request: Request, controls: &[Control]) -> Result<LdapResult> {
        let url: LdapUrl = url.parse()?;
        let conn = self.factory.connect(&url).await?;
        let outcome = match conn.submit(request, controls.to_vec()).await {
            Ok(handle) => handle.result().await,
            Err(e) => Err(e),
        };
        close(&conn, &url).await;
        outcome
    }

    async fn search_hop(&self, url: &str, request: &SearchRequest, controls: &[Control]) -> Result<SearchResponse> {
        let url: LdapUrl = url.parse()?;
        let mut request = request.clone();
        // a continuation reference may name the base and scope to use there
        if let Some(ref dn) = url.dn {
            if !dn.is_empty() {
                request.base_object = dn.clone();
            }
        }
        if let Some(scope) = url.scope {
            request.scope = scope;
        }
        let conn = self.factory.connect(&url).await?;
        let outcome = match conn.submit(Request::Search(request), controls.to_vec()).await {
            Ok(handle) => handle.search_response().await,
            Err(e) => Err(e),
        };
        close(&conn, &url).await;
        outcome
    }
}

async fn close<C: Connection>(conn: &C, url: &LdapUrl) {
    if let Err(e) = conn.close().await {
        debug!("Close of referral connection to {} failed: {}", url.address(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockConnection, MockFactory, Reply};
    use crate::protocol::testing::entry;
    use crate::protocol::{DelRequest, Response, SearchScope};

    fn referral(to: &str) -> LdapResult {
        let mut result = LdapResult::new(ResultCode::REFERRAL);
        result.referrals.push(format!("ldap://{}/", to));
        result
    }

    fn reply(result: LdapResult) -> Reply {
        Reply::Messages(vec![Response::Done(result)])
    }

    fn delete() -> Request {
        Request::Delete(DelRequest {
            entry: "cn=gone,dc=example".to_string(),
        })
    }

    #[tokio::test]
    async fn test_single_hop() {
        let factory = MockFactory::default();
        let target = MockConnection::new(vec![reply(LdapResult::new(ResultCode::SUCCESS))]);
        factory.add("b.example:389", target.clone());
        let follower = ReferralFollower::new(factory.clone());

        let result = follower.follow(&delete(), &[], referral("b.example")).await.unwrap();
        assert_eq!(result.code, ResultCode::SUCCESS);
        assert_eq!(target.close_count(), 1);
        assert!(matches!(target.submitted()[0].1, Request::Delete(ref del) if del.entry == "cn=gone,dc=example"));
    }

    #[tokio::test]
    async fn test_chain_hits_limit() {
        let factory = MockFactory::default();
        let mut hops = Vec::new();
        for i in 1..=5 {
            let conn = MockConnection::new(vec![reply(referral(&format!("h{}.example", i + 1)))]);
            factory.add(&format!("h{}.example:389", i), conn.clone());
            hops.push(conn);
        }
        let follower = ReferralFollower::new(factory.clone()).with_limit(3);
        let err = follower.follow(&delete(), &[], referral("h1.example")).await.unwrap_err();
        assert!(matches!(err, Error::ReferralLimitExceeded(3)));
        assert_eq!(factory.attempts(), vec!["h1.example:389", "h2.example:389", "h3.example:389"]);
        assert!(hops[..3].iter().all(|c| c.close_count() == 1));

        // the limit applies even when failures are thrown
        let follower = ReferralFollower::new(factory).with_limit(0).with_throw_on_failure(true);
        assert!(matches!(
            follower.follow(&delete(), &[], referral("h4.example")).await,
            Err(Error::ReferralLimitExceeded(0))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        let original = referral("down.example");
        let follower = ReferralFollower::new(MockFactory::default());
        let result = follower.follow(&delete(), &[], original.clone()).await.unwrap();
        assert_eq!(result, original);

        let follower = ReferralFollower::new(MockFactory::default()).with_throw_on_failure(true);
        match follower.follow(&delete(), &[], original).await {
            Err(Error::ReferralFailed { url, source }) => {
                assert_eq!(url, "ldap://down.example/");
                assert!(matches!(*source, Error::Io(_)));
            }
            other => panic!("expected ReferralFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hop_failure_result_returned_as_is() {
        let factory = MockFactory::default();
        let mut missing = LdapResult::new(ResultCode::NO_SUCH_OBJECT);
        missing.message = "no such entry".to_string();
        let target = MockConnection::new(vec![reply(missing.clone())]);
        factory.add("b.example:389", target.clone());
        let result = ReferralFollower::new(factory)
            .follow(&delete(), &[], referral("b.example"))
            .await
            .unwrap();
        assert_eq!(result, missing);
        assert_eq!(target.close_count(), 1);
    }

    #[tokio::test]
    async fn test_search_references_merged() {
        let factory = MockFactory::default();
        let east = MockConnection::new(vec![Reply::Messages(vec![
            Response::Entry(entry("cn=e1,ou=east,dc=example")),
            Response::Entry(entry("cn=e2,ou=east,dc=example")),
            Response::Done(LdapResult::new(ResultCode::SUCCESS)),
        ])]);
        factory.add("east.example:389", east.clone());
        let origin = MockConnection::new(vec![Reply::Messages(vec![
            Response::Entry(entry("cn=local,dc=example")),
            Response::Reference(SearchReference {
                urls: vec!["ldap://east.example/ou=east,dc=example??sub".to_string()],
                controls: Vec::new(),
            }),
            Response::Reference(SearchReference {
                urls: vec!["ldap://west.example/ou=west,dc=example".to_string()],
                controls: Vec::new(),
            }),
            Response::Done(LdapResult::new(ResultCode::SUCCESS)),
        ])]);

        let request = SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(cn=*)");
        let response = ReferralFollower::new(factory.clone())
            .search(&origin, &request, &[])
            .await
            .unwrap();
        let dns: Vec<&str> = response.entries.iter().map(|e| e.dn.as_str()).collect();
        assert_eq!(dns, vec!["cn=local,dc=example", "cn=e1,ou=east,dc=example", "cn=e2,ou=east,dc=example"]);
        assert_eq!(response.references.len(), 1);
        assert_eq!(response.references[0].urls[0], "ldap://west.example/ou=west,dc=example");
        assert_eq!(response.result.code, ResultCode::SUCCESS);

        match &east.submitted()[0].1 {
            Request::Search(sent) => assert_eq!(sent.base_object, "ou=east,dc=example"),
            other => panic!("expected search, got {:?}", other),
        }
        assert_eq!(east.close_count(), 1);
    }

    fn reference(url: &str) -> SearchReference {
        SearchReference {
            urls: vec![url.to_string()],
            controls: Vec::new(),
        }
    }

    fn with_references(references: Vec<SearchReference>) -> SearchResponse {
        let mut response = SearchResponse::new(LdapResult::new(ResultCode::SUCCESS));
        response.references = references;
        response
    }

    #[tokio::test]
    async fn test_search_reference_chain_hits_limit() {
        let factory = MockFactory::default();
        for i in 1..=4 {
            let conn = MockConnection::new(vec![Reply::Messages(vec![
                Response::Entry(entry(&format!("cn=r{},dc=example", i))),
                Response::Reference(reference(&format!("ldap://r{}.example/dc=example", i + 1))),
                Response::Done(LdapResult::new(ResultCode::SUCCESS)),
            ])]);
            factory.add(&format!("r{}.example:389", i), conn);
        }
        let request = SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(cn=*)");
        let origin = with_references(vec![reference("ldap://r1.example/dc=example")]);

        let err = ReferralFollower::new(factory.clone())
            .with_limit(2)
            .follow_search(&request, &[], origin.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReferralLimitExceeded(2)));
        assert_eq!(factory.attempts(), vec!["r1.example:389", "r2.example:389"]);

        // a chain within the limit is followed to the end
        let factory = MockFactory::default();
        for i in 1..=2 {
            let conn = MockConnection::new(vec![Reply::Messages(vec![
                Response::Entry(entry(&format!("cn=r{},dc=example", i))),
                Response::Done(LdapResult::new(ResultCode::SUCCESS)),
            ])]);
            factory.add(&format!("r{}.example:389", i), conn);
        }
        let response = ReferralFollower::new(factory)
            .with_limit(1)
            .follow_search(
                &request,
                &[],
                with_references(vec![
                    reference("ldap://r1.example/dc=example"),
                    reference("ldap://r2.example/dc=example"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(response.entries.len(), 2);
        assert!(response.references.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_search_reference() {
        let request = SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(cn=*)");
        let origin = with_references(vec![reference("ldap://down.example/ou=down,dc=example")]);

        let kept = ReferralFollower::new(MockFactory::default())
            .follow_search(&request, &[], origin.clone())
            .await
            .unwrap();
        assert_eq!(kept.references, origin.references);

        let follower = ReferralFollower::new(MockFactory::default()).with_throw_on_failure(true);
        match follower.follow_search(&request, &[], origin).await {
            Err(Error::ReferralFailed { url, source }) => {
                assert_eq!(url, "ldap://down.example/ou=down,dc=example");
                assert!(matches!(*source, Error::Io(_)));
            }
            other => panic!("expected ReferralFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_referral_result() {
        let factory = MockFactory::default();
        let target = MockConnection::new(vec![Reply::Messages(vec![
            Response::Entry(entry("cn=x,dc=example")),
            Response::Done(LdapResult::new(ResultCode::SUCCESS)),
        ])]);
        factory.add("b.example:389", target);
        let request = SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(cn=x)");
        let response = ReferralFollower::new(factory)
            .follow_search(&request, &[], SearchResponse::new(referral("b.example")))
            .await
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.result.code, ResultCode::SUCCESS);
    }
}
