#![allow(dead_code)]

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use async_trait::async_trait;
use exam_backend::cache::{CacheError, CacheResult, CacheStore, MemoryStore, SharedCacheStore};
use exam_backend::config::{get_config, init_config, ProctoringPolicy};
use exam_backend::database::pool::{connect, migrate};
use exam_backend::middleware::auth::Claims;
use exam_backend::AppState;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

pub struct TestApp {
    pub pool: PgPool,
    pub state: AppState,
}

pub fn fast_policy() -> ProctoringPolicy {
    ProctoringPolicy {
        heartbeat_interval: Duration::from_millis(500),
        disconnect_grace: Duration::from_millis(300),
        ..ProctoringPolicy::default()
    }
}

/// Connects to `DATABASE_URL` and applies migrations. Returns `None` when no database is
/// configured so the suite can run on machines without PostgreSQL.
pub async fn setup() -> Option<TestApp> {
    setup_with(fast_policy()).await
}

pub async fn setup_with(policy: ProctoringPolicy) -> Option<TestApp> {
    setup_with_store(Arc::new(MemoryStore::new()), policy).await
}

pub async fn setup_with_store(store: SharedCacheStore, policy: ProctoringPolicy) -> Option<TestApp> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set; skipping database test");
        return None;
    };
    env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
    env::set_var("REDIS_URL", "memory://");
    if env::var("JWT_SECRET").is_err() {
        env::set_var("JWT_SECRET", "test_secret_key");
    }
    let _ = init_config();

    let pool = connect(&database_url, 20).await.expect("pool");
    migrate(&pool).await.expect("migrations");
    let state = AppState::new(pool.clone(), store, policy);
    Some(TestApp { pool, state })
}

pub struct ExamSeed {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_minutes: i32,
    pub passing_score: Decimal,
    pub negative_marking: bool,
    pub is_active: bool,
}

impl Default for ExamSeed {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_minutes: 60,
            passing_score: Decimal::new(50, 0),
            negative_marking: false,
            is_active: true,
        }
    }
}

pub async fn seed_exam(pool: &PgPool, seed: ExamSeed) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO exams (title, duration_minutes, passing_score, is_active, start_time, end_time, enable_negative_marking)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(format!("Exam {}", Uuid::new_v4()))
    .bind(seed.duration_minutes)
    .bind(seed.passing_score)
    .bind(seed.is_active)
    .bind(seed.start_time)
    .bind(seed.end_time)
    .bind(seed.negative_marking)
    .fetch_one(pool)
    .await
    .expect("seed exam")
}

pub async fn seed_question(
    pool: &PgPool,
    exam_id: Uuid,
    question_type: &str,
    correct_answer: &str,
    points: i32,
    negative_points: f64,
    order_number: i32,
) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO questions (exam_id, question_type, question_text, options, correct_answer, points, negative_points, order_number)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(exam_id)
    .bind(question_type)
    .bind(format!("Question {}", order_number))
    .bind(serde_json::json!(["A", "B", "C", "D"]))
    .bind(correct_answer)
    .bind(points)
    .bind(negative_points)
    .bind(order_number)
    .fetch_one(pool)
    .await
    .expect("seed question")
}

/// Exam with four one-point single-choice questions whose answer is "A".
pub async fn seed_simple_exam(pool: &PgPool) -> (Uuid, Vec<Uuid>) {
    let exam_id = seed_exam(pool, ExamSeed::default()).await;
    let mut questions = Vec::new();
    for order in 0..4 {
        questions.push(seed_question(pool, exam_id, "single-choice", "A", 1, 0.0, order).await);
    }
    (exam_id, questions)
}

pub fn bearer(user_id: Uuid, role: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
        role: Some(role.to_string()),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(get_config().jwt_secret.as_bytes()),
    )
    .expect("sign token");
    format!("Bearer {}", token)
}

/// Cache that behaves like an unreachable Redis.
pub struct UnavailableStore;

fn refused<T>() -> CacheResult<T> {
    Err(CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    ))))
}

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        refused()
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        refused()
    }
    async fn set_nx(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<bool> {
        refused()
    }
    async fn del(&self, _key: &str) -> CacheResult<()> {
        refused()
    }
    async fn del_if_eq(&self, _key: &str, _expected: &str) -> CacheResult<bool> {
        refused()
    }
    async fn max_i64(&self, _key: &str, _value: i64, _ttl: Duration) -> CacheResult<i64> {
        refused()
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        refused()
    }
    async fn keys_with_prefix(&self, _prefix: &str) -> CacheResult<Vec<String>> {
        refused()
    }
    async fn ping(&self) -> CacheResult<()> {
        refused()
    }
}

/// In-memory cache that can be switched off and on again.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> CacheResult<()> {
        if self.down.load(Ordering::SeqCst) {
            refused()
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for FlakyStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        self.inner.set_nx(key, value, ttl).await
    }
    async fn del(&self, key: &str) -> CacheResult<()> {
        self.check()?;
        self.inner.del(key).await
    }
    async fn del_if_eq(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.check()?;
        self.inner.del_if_eq(key, expected).await
    }
    async fn max_i64(&self, key: &str, value: i64, ttl: Duration) -> CacheResult<i64> {
        self.check()?;
        self.inner.max_i64(key, value, ttl).await
    }
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        self.inner.keys_with_prefix(prefix).await
    }
    async fn ping(&self) -> CacheResult<()> {
        self.check()?;
        self.inner.ping().await
    }
}
