use chrono::Utc;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use glacis_application::IdentityRepository;
use glacis_core::AppError;
use glacis_domain::{AuditEvent, AuditEventType, AuditOutcome, Identity, RoleName};

use super::PostgresIdentityRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres identity tests: {error}");
    }

    Some(pool)
}

fn role(name: &str) -> RoleName {
    match RoleName::new(name) {
        Ok(role) => role,
        Err(error) => panic!("invalid role name in test: {error}"),
    }
}

fn bound_identity(provider_id: &str, external_subject: &str) -> Identity {
    let mut identity = Identity::provisioned(Utc::now());
    identity.provider_id = Some(provider_id.to_owned());
    identity.external_subject = Some(external_subject.to_owned());
    identity
}

fn login_event(identity: &Identity) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::AuthnLoginSuccess,
        AuditOutcome::Success,
        Utc::now(),
        identity.provider_id.clone().unwrap_or_default(),
        identity.external_subject.clone().unwrap_or_default(),
        Some(identity.id),
    )
}

#[tokio::test]
async fn insert_then_find_by_natural_key_round_trips_roles() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresIdentityRepository::new(pool.clone());
    let subject = format!("subject-{}", Uuid::new_v4());
    let mut identity = bound_identity("https://idp.example.org/realms/clinical", &subject);
    identity.display_name = Some("Dr. Vermeer".to_owned());
    identity.email = Some(format!("{subject}@clinic.example"));
    identity.roles.insert(role("PATHOLOGIST"));
    identity.roles.insert(role("RESEARCHER"));

    let inserted = repository
        .insert(&identity, &[login_event(&identity)])
        .await;
    assert!(inserted.is_ok());

    let found = repository
        .find_by_natural_key("https://idp.example.org/realms/clinical", &subject)
        .await;
    assert!(found.is_ok());
    let Ok(Some(found)) = found else {
        panic!("inserted identity was not found by natural key");
    };
    assert_eq!(found.id, identity.id);
    assert_eq!(found.display_name.as_deref(), Some("Dr. Vermeer"));
    assert_eq!(found.roles.len(), 2);
    assert!(found.roles.contains(&role("PATHOLOGIST")));

    let audit_rows = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM audit_event WHERE actor_external_subject = $1",
    )
    .bind(&subject)
    .fetch_one(&pool)
    .await;
    assert_eq!(audit_rows.ok(), Some(1));
}

#[tokio::test]
async fn duplicate_natural_key_insert_reports_conflict() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresIdentityRepository::new(pool);
    let subject = format!("subject-{}", Uuid::new_v4());
    let first = bound_identity("https://idp.example.org/realms/clinical", &subject);
    let second = bound_identity("https://idp.example.org/realms/clinical", &subject);

    assert!(repository.insert(&first, &[]).await.is_ok());

    let collided = repository.insert(&second, &[]).await;
    assert!(matches!(collided, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn update_replaces_the_stored_role_set() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresIdentityRepository::new(pool);
    let subject = format!("subject-{}", Uuid::new_v4());
    let mut identity = bound_identity("https://idp.example.org/realms/clinical", &subject);
    identity.roles.insert(role("PATHOLOGIST"));
    assert!(repository.insert(&identity, &[]).await.is_ok());

    identity.roles.clear();
    identity.roles.insert(role("ADMIN"));
    identity.updated_at = Utc::now();
    assert!(repository.update(&identity, &[]).await.is_ok());

    let reloaded = repository.find_by_id(identity.id).await;
    let Ok(Some(reloaded)) = reloaded else {
        panic!("updated identity was not found by id");
    };
    assert_eq!(reloaded.roles.len(), 1);
    assert!(reloaded.roles.contains(&role("ADMIN")));
}

#[tokio::test]
async fn email_lookup_finds_an_unbound_record() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresIdentityRepository::new(pool);
    let email = format!("legacy-{}@clinic.example", Uuid::new_v4());
    let mut legacy = Identity::provisioned(Utc::now());
    legacy.email = Some(email.clone());
    assert!(repository.insert(&legacy, &[]).await.is_ok());

    let found = repository.find_by_email(&email).await;
    let Ok(Some(found)) = found else {
        panic!("legacy identity was not found by email");
    };
    assert_eq!(found.id, legacy.id);
    assert!(found.provider_id.is_none());
}

#[tokio::test]
async fn updating_a_missing_identity_reports_not_found() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let repository = PostgresIdentityRepository::new(pool);
    let never_stored = Identity::provisioned(Utc::now());

    let updated = repository.update(&never_stored, &[]).await;
    assert!(matches!(updated, Err(AppError::NotFound(_))));
}
