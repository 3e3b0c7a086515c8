mod common;

use anyhow::Result;
use common::{created, open, MockServer};
use pssst::{Error, Label, Lifecycle};
use tempfile::tempdir;

#[tokio::test]
async fn test_delete_user() -> Result<()> {
    let dir = tempdir()?;
    let server = MockServer::current();

    let mut alice = created(&server, dir.path(), "alice").await;
    let container = alice.keys().path().to_path_buf();
    assert!(container.exists());

    alice.delete().await?;

    assert_eq!(alice.lifecycle(), Lifecycle::Deleted);
    assert!(!container.exists());
    Ok(())
}

#[tokio::test]
async fn test_deleted_client_is_unusable() -> Result<()> {
    let dir = tempdir()?;
    let server = MockServer::current();

    let mut alice = created(&server, dir.path(), "alice").await;
    let _bob = created(&server, dir.path(), "bob").await;
    alice.delete().await?;
    let requests = server.request_count();

    assert!(matches!(alice.pull().await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.pull_all().await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.push("bob", b"hi").await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.find("bob").await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.create().await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.delete().await, Err(Error::IdentityDeleted)));
    assert!(matches!(alice.keys().list(false), Err(Error::IdentityDeleted)));

    // nothing reached the server
    assert_eq!(server.request_count(), requests);
    Ok(())
}

#[tokio::test]
async fn test_deleted_user_is_gone_for_peers() -> Result<()> {
    let dir = tempdir()?;
    let server = MockServer::current();

    let mut alice = created(&server, dir.path(), "alice").await;
    let bob = created(&server, dir.path(), "bob").await;
    alice.delete().await?;

    let err = bob.find("alice").await.unwrap_err();
    assert_eq!(err.to_string(), "User was deleted");

    let err = bob.push("alice", b"anyone there?").await.unwrap_err();
    assert!(matches!(err, Error::ServerRejected(ref text) if text == "User was deleted"));
    assert!(!bob.keys().contains(&Label::Peer("alice".into()))?);
    Ok(())
}

#[tokio::test]
async fn test_create_twice() -> Result<()> {
    let dir = tempdir()?;
    let server = MockServer::current();

    let alice = created(&server, dir.path(), "alice").await;

    let err = alice.create().await.unwrap_err();
    assert!(matches!(err, Error::ServerRejected(ref text) if text == "User already exists"));
    assert_eq!(alice.lifecycle(), Lifecycle::Active);
    Ok(())
}

#[tokio::test]
async fn test_name_is_not_reusable_after_delete() -> Result<()> {
    let dir = tempdir()?;
    let server = MockServer::current();

    let mut alice = created(&server, dir.path(), "alice").await;
    alice.delete().await?;

    // a fresh container is created locally, but the server keeps the name
    let again = open(server.clone(), server.protocol(), dir.path(), "alice").await?;
    assert_eq!(again.lifecycle(), Lifecycle::Active);

    let err = again.create().await.unwrap_err();
    assert_eq!(err.to_string(), "User already exists");
    Ok(())
}
