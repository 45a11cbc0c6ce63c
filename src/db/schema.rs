diesel::table! {
    users (id) {
        id -> Integer,
        email -> Text,
        hashed_password -> Text,
        name -> Nullable<Text>,
        is_active -> Bool,
        created_at -> BigInt,
        last_login_at -> Nullable<BigInt>,
    }
}

diesel::table! {
    events (id) {
        id -> Integer,
        user_id -> Integer,
        event_type -> Text,
        event_key -> Text,
        severity -> Text,
        source -> Text,
        context -> Nullable<Text>,
        occurred_at -> BigInt,
        recorded_at -> BigInt,
        idempotency_key -> Nullable<Text>,
    }
}

diesel::table! {
    behavior_patterns (id) {
        id -> Integer,
        user_id -> Integer,
        pattern_key -> Text,
        related_event_key -> Text,
        occurrence_count -> BigInt,
        first_seen_at -> BigInt,
        last_seen_at -> BigInt,
        status -> Text,
        metadata -> Nullable<Text>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    memories (id) {
        id -> Integer,
        user_id -> Integer,
        memory_key -> Text,
        memory_type -> Text,
        memory_value -> Text,
        confidence_score -> Double,
        source -> Text,
        last_reinforced_at -> BigInt,
        reinforcement_count -> BigInt,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::joinable!(events -> users (user_id));
diesel::joinable!(behavior_patterns -> users (user_id));
diesel::joinable!(memories -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(users, events, behavior_patterns, memories);
