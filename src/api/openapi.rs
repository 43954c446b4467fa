//! OpenAPI 3.0 description of the HTTP surface.

use serde_json::{json, Value};

use crate::domain::RecordStatus;

pub fn document() -> Value {
    let statuses: Vec<&str> = RecordStatus::ALL.iter().map(|s| s.as_str()).collect();
    let tenant = json!({ "$ref": "#/components/parameters/TenantId" });
    let actor = json!({ "$ref": "#/components/parameters/Actor" });
    let record_id = json!({ "$ref": "#/components/parameters/RecordId" });

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Quality Governance API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/healthz": {
                "get": {
                    "summary": "Liveness probe",
                    "responses": { "200": { "description": "Process is up" } }
                }
            },
            "/readyz": {
                "get": {
                    "summary": "Readiness probe",
                    "responses": {
                        "200": { "description": "Record store reachable" },
                        "503": { "description": "Record store unreachable" }
                    }
                }
            },
            "/metrics": {
                "get": {
                    "summary": "Prometheus metrics",
                    "responses": { "200": { "description": "Text exposition format" } }
                }
            },
            "/api/v1/records/{id}": {
                "get": {
                    "summary": "Fetch a record",
                    "parameters": [tenant, record_id],
                    "responses": {
                        "200": { "description": "The record" },
                        "404": { "$ref": "#/components/responses/Error" }
                    }
                }
            },
            "/api/v1/records/{id}/transitions": {
                "get": {
                    "summary": "Transition history and allowed targets",
                    "parameters": [tenant, record_id],
                    "responses": {
                        "200": { "description": "History of the record" },
                        "404": { "$ref": "#/components/responses/Error" }
                    }
                },
                "post": {
                    "summary": "Move a record to another status",
                    "parameters": [tenant, actor, record_id],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": {
                            "type": "object",
                            "required": ["to"],
                            "properties": {
                                "to": { "type": "string", "enum": statuses },
                                "reason": { "type": "string" },
                                "attributes": { "type": "object" }
                            }
                        } } }
                    },
                    "responses": {
                        "200": { "description": "Transition applied" },
                        "404": { "$ref": "#/components/responses/Error" },
                        "409": { "$ref": "#/components/responses/Error" },
                        "422": { "$ref": "#/components/responses/Error" }
                    }
                }
            },
            "/api/v1/records/{id}/approvals/decisions": {
                "post": {
                    "summary": "Approve or reject a pending approval",
                    "parameters": [tenant, actor, record_id],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": {
                            "type": "object",
                            "required": ["decision"],
                            "properties": {
                                "decision": { "type": "string", "enum": ["approve", "reject"] },
                                "comment": { "type": "string" }
                            }
                        } } }
                    },
                    "responses": {
                        "200": { "description": "Decision recorded" },
                        "404": { "$ref": "#/components/responses/Error" },
                        "409": { "$ref": "#/components/responses/Error" },
                        "422": { "$ref": "#/components/responses/Error" }
                    }
                }
            },
            "/api/v1/audits/score": {
                "post": {
                    "summary": "Score an audit run against a template",
                    "parameters": [
                        tenant,
                        actor,
                        {
                            "name": "strict",
                            "in": "query",
                            "schema": { "type": "boolean", "default": false }
                        }
                    ],
                    "requestBody": {
                        "required": true,
                        "content": { "application/json": { "schema": {
                            "type": "object",
                            "required": ["template", "responses"],
                            "properties": {
                                "template": { "type": "object" },
                                "responses": {
                                    "type": "object",
                                    "additionalProperties": {}
                                },
                                "record_id": { "type": "string", "format": "uuid" }
                            }
                        } } }
                    },
                    "responses": {
                        "200": { "description": "Stored score report" },
                        "422": { "$ref": "#/components/responses/Error" }
                    }
                }
            }
        },
        "components": {
            "parameters": {
                "TenantId": {
                    "name": "x-tenant-id",
                    "in": "header",
                    "required": true,
                    "schema": { "type": "string" }
                },
                "Actor": {
                    "name": "x-actor",
                    "in": "header",
                    "required": true,
                    "schema": { "type": "string" }
                },
                "RecordId": {
                    "name": "id",
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string", "format": "uuid" }
                }
            },
            "responses": {
                "Error": {
                    "description": "Error envelope",
                    "content": { "application/json": { "schema": {
                        "$ref": "#/components/schemas/ErrorEnvelope"
                    } } }
                }
            },
            "schemas": {
                "ErrorEnvelope": {
                    "type": "object",
                    "properties": {
                        "error": {
                            "type": "object",
                            "required": ["code", "message", "details", "request_id"],
                            "properties": {
                                "code": {
                                    "type": "string",
                                    "enum": ["bad_request", "not_found", "conflict", "unprocessable", "timeout", "internal"]
                                },
                                "message": { "type": "string" },
                                "details": { "type": "object" },
                                "request_id": { "type": "string" }
                            }
                        }
                    }
                }
            }
        }
    })
}
