// Diesel table definitions. Kept hand-written (not diesel print-schema
// generated) as a single, reviewed schema.rs alongside migrations.

diesel::table! {
    uploads (id) {
        id -> Text,
        workspace_id -> Text,
        original_filename -> Text,
        company -> Text,
        year -> Nullable<Integer>,
        month -> Nullable<Integer>,
        doc_type -> Text,
        total_pages -> Integer,
        state -> Text,
        last_message -> Nullable<Text>,
        current_page -> Integer,
        extract_state -> Text,
        cancelled -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    pages (id) {
        id -> Text,
        upload_id -> Text,
        page_num -> Integer,
        markdown -> Nullable<Text>,
        state -> Text,
        error -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    schemas (id) {
        id -> Text,
        workspace_id -> Text,
        company -> Text,
        name -> Text,
        row_anchor -> Text,
        value_anchor -> Text,
        extras_json -> Text,
        include_page -> Bool,
        include_heading -> Bool,
        fill_down_value -> Bool,
        match_child -> Nullable<Text>,
        melt -> Bool,
        is_default -> Bool,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(pages -> uploads (upload_id));
diesel::allow_tables_to_appear_in_same_query!(uploads, pages, schemas);
