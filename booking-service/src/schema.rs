diesel::table! {
    events (id) {
        id -> Uuid,
        name -> Varchar,
        total_tickets -> Int4,
        available_tickets -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        event_id -> Uuid,
        user_id -> Varchar,
        status -> Varchar,
        seq -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(bookings -> events (event_id));

diesel::allow_tables_to_appear_in_same_query!(
    events,
    bookings,
);
