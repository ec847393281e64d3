//! End-to-end planning scenarios against a shared composed schema. Expected
//! plans are written as JSON and compared structurally after
//! deserialization.

use federated_query_planner::model::QueryPlan;
use federated_query_planner::{QueryPlanError, QueryPlanner};

static CSDL: &str = include_str!("fixtures/csdl.graphql");

fn planner() -> QueryPlanner {
    QueryPlanner::new(CSDL).expect("fixture schema should parse")
}

fn assert_query_plan(query: &str, expected_json: &str) {
    let expected: QueryPlan =
        serde_json::from_str(expected_json).expect("expected plan should deserialize");
    let result = planner().plan(query, None).expect("planning should succeed");
    assert_eq!(result, expected);
}

#[test]
fn plans_a_single_service_query_as_one_fetch() {
    assert_query_plan(
        "{ me { name } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "selectionSet": "{me{name}}"
          }
        }"#,
    );
}

#[test]
fn fetches_root_fields_of_different_services_in_parallel() {
    assert_query_plan(
        "{ me { name } topProducts { upc } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Parallel",
            "nodes": [
              { "kind": "Fetch", "serviceName": "accounts", "selectionSet": "{me{name}}" },
              { "kind": "Fetch", "serviceName": "products", "selectionSet": "{topProducts{upc}}" }
            ]
          }
        }"#,
    );
}

#[test]
fn batches_root_fields_of_the_same_service_into_one_fetch() {
    assert_query_plan(
        "{ me { name } user(id: \"1\") { name } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "selectionSet": "{me{name}user(id:\"1\"){name}}"
          }
        }"#,
    );
}

#[test]
fn plans_an_entity_extension_as_a_dependent_fetch() {
    assert_query_plan(
        "{ me { name reviews { body } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "accounts",
                "selectionSet": "{me{name __typename id}}"
              },
              {
                "kind": "Flatten",
                "path": ["me"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "reviews",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "User",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "id" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on User{reviews{body}}}"
                }
              }
            ]
          }
        }"#,
    );
}

#[test]
fn adds_extension_requirements_only_once() {
    assert_query_plan(
        "{ me { reviews { body } numberOfReviews } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "accounts",
                "selectionSet": "{me{__typename id}}"
              },
              {
                "kind": "Flatten",
                "path": ["me"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "reviews",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "User",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "id" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on User{reviews{body}numberOfReviews}}"
                }
              }
            ]
          }
        }"#,
    );
}

#[test]
fn preserves_mutation_order_with_per_service_cuts() {
    assert_query_plan(
        r#"mutation {
          createReview(body: "great") { id }
          updateReview(id: "1", body: "ok") { id }
          login(username: "u", password: "p") { id }
          deleteReview(id: "2") { id }
        }"#,
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "reviews",
                "selectionSet": "{createReview(body:\"great\"){id}updateReview(id:\"1\" body:\"ok\"){id}}"
              },
              {
                "kind": "Fetch",
                "serviceName": "accounts",
                "selectionSet": "{login(username:\"u\" password:\"p\"){id}}"
              },
              {
                "kind": "Fetch",
                "serviceName": "reviews",
                "selectionSet": "{deleteReview(id:\"2\"){id}}"
              }
            ]
          }
        }"#,
    );
}

#[test]
fn keeps_provided_fields_in_the_parent_fetch() {
    assert_query_plan(
        "{ topReviews { author { username } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "reviews",
            "selectionSet": "{topReviews{author{username}}}"
          }
        }"#,
    );
}

#[test]
fn fetches_unprovided_fields_from_the_owning_service() {
    assert_query_plan(
        "{ topReviews { author { name } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "reviews",
                "selectionSet": "{topReviews{author{__typename id}}}"
              },
              {
                "kind": "Flatten",
                "path": ["topReviews", "@", "author"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "accounts",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "User",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "id" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on User{name}}"
                }
              }
            ]
          }
        }"#,
    );
}

#[test]
fn guards_divergent_interface_owners_by_concrete_type() {
    assert_query_plan(
        "{ media { title } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "catalog",
                "selectionSet": "{media{__typename ...on Book{__typename isbn}...on Movie{__typename id}}}"
              },
              {
                "kind": "Parallel",
                "nodes": [
                  {
                    "kind": "Flatten",
                    "path": ["media", "@"],
                    "node": {
                      "kind": "Fetch",
                      "serviceName": "books",
                      "requires": [
                        {
                          "kind": "InlineFragment",
                          "typeCondition": "Book",
                          "selections": [
                            { "kind": "Field", "name": "__typename" },
                            { "kind": "Field", "name": "isbn" }
                          ]
                        }
                      ],
                      "selectionSet": "{...on Book{title}}"
                    }
                  },
                  {
                    "kind": "Flatten",
                    "path": ["media", "@"],
                    "node": {
                      "kind": "Fetch",
                      "serviceName": "movies",
                      "requires": [
                        {
                          "kind": "InlineFragment",
                          "typeCondition": "Movie",
                          "selections": [
                            { "kind": "Field", "name": "__typename" },
                            { "kind": "Field", "name": "id" }
                          ]
                        }
                      ],
                      "selectionSet": "{...on Movie{title}}"
                    }
                  }
                ]
              }
            ]
          }
        }"#,
    );
}

#[test]
fn requests_single_owner_interface_fields_under_the_abstract_type() {
    assert_query_plan(
        "{ attachments { size } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "documents",
            "selectionSet": "{attachments{__typename size}}"
          }
        }"#,
    );
}

#[test]
fn plans_unions_of_one_service_as_a_single_fetch() {
    assert_query_plan(
        "{ body { ... on Image { url } ... on Text { content } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "documents",
            "selectionSet": "{body{__typename ...on Image{url}...on Text{content}}}"
          }
        }"#,
    );
}

#[test]
fn pulls_required_fields_into_the_parent_fetch() {
    assert_query_plan(
        "{ topProducts { shippingEstimate } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "products",
                "selectionSet": "{topProducts{__typename upc price weight}}"
              },
              {
                "kind": "Flatten",
                "path": ["topProducts", "@"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "shipping",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "Product",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "upc" },
                        { "kind": "Field", "name": "price" },
                        { "kind": "Field", "name": "weight" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on Product{shippingEstimate}}"
                }
              }
            ]
          }
        }"#,
    );
}

#[test]
fn hops_through_the_base_service_when_requirements_are_missing() {
    assert_query_plan(
        "{ topReviews { product { shippingEstimate } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Sequence",
            "nodes": [
              {
                "kind": "Fetch",
                "serviceName": "reviews",
                "selectionSet": "{topReviews{product{__typename upc}}}"
              },
              {
                "kind": "Flatten",
                "path": ["topReviews", "@", "product"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "products",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "Product",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "upc" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on Product{__typename upc price weight}}"
                }
              },
              {
                "kind": "Flatten",
                "path": ["topReviews", "@", "product"],
                "node": {
                  "kind": "Fetch",
                  "serviceName": "shipping",
                  "requires": [
                    {
                      "kind": "InlineFragment",
                      "typeCondition": "Product",
                      "selections": [
                        { "kind": "Field", "name": "__typename" },
                        { "kind": "Field", "name": "upc" },
                        { "kind": "Field", "name": "price" },
                        { "kind": "Field", "name": "weight" }
                      ]
                    }
                  ],
                  "selectionSet": "{...on Product{shippingEstimate}}"
                }
              }
            ]
          }
        }"#,
    );
}

#[test]
fn reports_variable_usages_per_fetch() {
    assert_query_plan(
        "query GetUser($id: ID!) { user(id: $id) { name } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "variableUsages": ["id"],
            "selectionSet": "{user(id:$id){name}}"
          }
        }"#,
    );
}

#[test]
fn preserves_aliases_and_directives() {
    assert_query_plan(
        "query GetReviews($skip: Boolean!) { topReviews { body author @skip(if: $skip) { username } } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "reviews",
            "variableUsages": ["skip"],
            "selectionSet": "{topReviews{body author@skip(if:$skip){username}}}"
          }
        }"#,
    );

    assert_query_plan(
        "{ me { nick: name } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "selectionSet": "{me{nick:name}}"
          }
        }"#,
    );
}

#[test]
fn inlines_named_fragments() {
    assert_query_plan(
        "query { me { ...userFields } } fragment userFields on User { name username }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "selectionSet": "{me{name username}}"
          }
        }"#,
    );
}

#[test]
fn drops_introspection_fields() {
    assert_query_plan(
        "{ __typename me { name } }",
        r#"{
          "kind": "QueryPlan",
          "node": {
            "kind": "Fetch",
            "serviceName": "accounts",
            "selectionSet": "{me{name}}"
          }
        }"#,
    );

    // A purely introspective operation plans to nothing.
    assert_query_plan("{ __schema { types { name } } }", r#"{ "kind": "QueryPlan" }"#);
}

#[test]
fn rejects_subscriptions() {
    let result = planner().plan("subscription { me { id } }", None);
    assert!(matches!(
        result,
        Err(QueryPlanError::SubscriptionsUnsupported)
    ));
}

#[test]
fn fails_on_composite_parents_without_a_base_service() {
    let result = planner().plan("{ me { metadata { address } } }", None);
    assert!(matches!(
        result,
        Err(QueryPlanError::MissingBaseService { ref type_name, .. }) if type_name == "UserMetadata"
    ));
}

#[test]
fn fails_when_the_base_hop_has_no_keys() {
    let result = planner().plan("{ gadgets { madeBy } }", None);
    assert!(matches!(
        result,
        Err(QueryPlanError::MissingKeys { ref type_name, ref service_name })
            if type_name == "Gadget" && service_name == "products"
    ));
}

#[test]
fn planning_is_idempotent_and_round_trips_through_json() {
    let planner = planner();
    let first = planner.plan("{ media { title } }", None).unwrap();
    let second = planner.plan("{ media { title } }", None).unwrap();
    assert_eq!(first, second);

    let json = serde_json::to_string(&first).unwrap();
    let reparsed: QueryPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(first, reparsed);
}
