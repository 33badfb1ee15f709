//! Declaration snippets shared by scenarios.

#![allow(dead_code)]

pub const ACCESS_SCOPE_YAML: &str = r#"
kind: AccessScope
name: Hogwarts
description: Everything inside the castle
rules:
  includedClusters:
    - hogwarts
"#;

pub const PERMISSION_SET_YAML: &str = r#"
kind: PermissionSet
name: Everything
resources:
  - resource: Access
    access: READ_WRITE_ACCESS
  - resource: Deployment
    access: READ_ACCESS
"#;

pub const ROLE_YAML: &str = r#"
kind: Role
name: Head Master
permissionSet: Everything
accessScope: Hogwarts
"#;

pub const AUTH_PROVIDER_YAML: &str = r#"
kind: AuthProvider
name: Owlery
type: oidc
uiEndpoint: hogwarts.example.com
minimumRole: Head Master
groups:
  - key: email
    value: dumbledore@hogwarts.example.com
    role: Head Master
requiredAttributes:
  - key: house
    value: any
config:
  issuer: https://owlery.example.com
"#;

pub const NOTIFIER_YAML: &str = r#"
kind: Notifier
name: Howler
type: generic
uiEndpoint: hogwarts.example.com
config:
  endpoint: https://howler.example.com/hook
"#;

pub const M2M_YAML: &str = r#"
kind: AuthMachineToMachineConfig
type: github_actions
issuer: https://token.actions.githubusercontent.com
tokenExpirationDuration: 5m
mappings:
  - key: sub
    valueExpression: repo:hogwarts/.*
    role: Head Master
"#;

pub const INVALID_YAML: &str = "kind: Role\nname: [unclosed\n";
